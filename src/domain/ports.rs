use super::account::{Account, AccountId};
use super::deposit::Deposit;
use super::notification::{Notification, NotificationId};
use super::order::Order;
use super::record::{LedgerRecord, RecordChange, RecordFilter, RecordStatus, StorageKey, SwapOutcome};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

pub const DEFAULT_MAX_CAS_ATTEMPTS: u32 = 16;

/// Pure read-modify-write step applied by [`AccountStore::mutate`].
///
/// Must not perform I/O: it only derives the next snapshot from the current one.
pub type AccountUpdate<'a> = &'a (dyn Fn(&Account) -> Result<Account> + Send + Sync);

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Inserts a new account. Returns `false` if the id is already taken.
    async fn create(&self, account: Account) -> Result<bool>;
    async fn get(&self, id: &AccountId) -> Result<Option<Account>>;
    async fn get_all(&self) -> Result<Vec<Account>>;
    /// Replaces the stored account with `next` only if its version still equals
    /// `expected_version`.
    async fn compare_and_swap(&self, expected_version: u64, next: Account) -> Result<bool>;

    fn max_attempts(&self) -> u32 {
        DEFAULT_MAX_CAS_ATTEMPTS
    }

    /// Atomically applies `update` to the current account.
    ///
    /// Conflicting commits are retried up to [`AccountStore::max_attempts`] times.
    /// A negative resulting balance is rejected with `InsufficientFunds` and
    /// nothing is written.
    async fn mutate(&self, id: &AccountId, update: AccountUpdate<'_>) -> Result<Account> {
        let attempts = self.max_attempts();
        for attempt in 1..=attempts {
            let current = self
                .get(id)
                .await?
                .ok_or_else(|| LedgerError::not_found("account", id.as_str()))?;

            let mut next = update(&current)?;
            if next.balance.is_negative() {
                return Err(LedgerError::InsufficientFunds {
                    required: (current.balance - next.balance).0,
                    available: current.balance.0,
                });
            }
            next.id = current.id.clone();
            next.version = current.version + 1;

            if self.compare_and_swap(current.version, next.clone()).await? {
                return Ok(next);
            }
            debug!(account = %id, attempt, "account changed concurrently, retrying");
            tokio::task::yield_now().await;
        }
        Err(LedgerError::ConcurrencyExhausted {
            account: id.to_string(),
            attempts,
        })
    }
}

/// Keyed, per-owner store of orders or deposits.
#[async_trait]
pub trait RecordRepository<R: LedgerRecord>: Send + Sync {
    /// Appends `record` with status `Pending` under a freshly generated key.
    async fn create(&self, record: R) -> Result<R>;
    async fn get(&self, owner: &AccountId, key: &StorageKey) -> Result<Option<R>>;
    /// Unconditional, last-write-wins status update.
    async fn update_status(&self, owner: &AccountId, key: &StorageKey, status: RecordStatus) -> Result<()>;
    /// Moves the record from `expected` to `next` only if it is still in `expected`.
    async fn compare_and_set_status(
        &self,
        owner: &AccountId,
        key: &StorageKey,
        expected: RecordStatus,
        next: RecordStatus,
    ) -> Result<SwapOutcome>;
    /// Permanently removes the record and leaves a tombstone for its key.
    /// Returns `false` if it did not exist.
    async fn delete(&self, owner: &AccountId, key: &StorageKey) -> Result<bool>;
    /// Whether `key` once held a record that has since been deleted.
    async fn was_deleted(&self, owner: &AccountId, key: &StorageKey) -> Result<bool>;
    async fn list(&self, filter: &RecordFilter) -> Result<Vec<R>>;
    /// Push-based feed of creations, status changes and deletions.
    fn subscribe(&self) -> broadcast::Receiver<RecordChange>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn push(&self, notification: Notification) -> Result<()>;
    async fn get(&self, id: &NotificationId) -> Result<Option<Notification>>;
    /// Notifications addressed to `account`, including broadcasts, newest first.
    async fn list_for(&self, account: &AccountId) -> Result<Vec<Notification>>;
    async fn list_all(&self) -> Result<Vec<Notification>>;
    async fn delete(&self, id: &NotificationId) -> Result<bool>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type AccountStoreRef = Arc<dyn AccountStore>;
pub type OrderRepositoryRef = Arc<dyn RecordRepository<Order>>;
pub type DepositRepositoryRef = Arc<dyn RecordRepository<Deposit>>;
pub type NotificationStoreRef = Arc<dyn NotificationStore>;
pub type ClockRef = Arc<dyn Clock>;

/// The storage backends the core is wired against.
#[derive(Clone)]
pub struct Stores {
    pub accounts: AccountStoreRef,
    pub orders: OrderRepositoryRef,
    pub deposits: DepositRepositoryRef,
    pub notifications: NotificationStoreRef,
}
