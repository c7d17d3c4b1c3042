use crate::domain::account::{Account, AccountId};
use crate::domain::deposit::Deposit;
use crate::domain::notification::{Notification, NotificationId};
use crate::domain::order::Order;
use crate::domain::ports::{
    AccountStore, DEFAULT_MAX_CAS_ATTEMPTS, NotificationStore, RecordRepository, Stores,
};
use crate::domain::record::{
    ChangeKind, LedgerRecord, RecordChange, RecordFilter, RecordStatus, StorageKey, SwapOutcome,
};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

const CHANGE_FEED_CAPACITY: usize = 256;

/// A thread-safe in-memory store for accounts.
///
/// Uses `Arc<RwLock<HashMap<AccountId, Account>>>`; the version check and the
/// write happen under the same write guard, which makes `compare_and_swap` atomic.
#[derive(Clone)]
pub struct InMemoryAccountStore {
    accounts: Arc<RwLock<HashMap<AccountId, Account>>>,
    max_attempts: u32,
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self {
            accounts: Arc::default(),
            max_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
        }
    }
}

impl InMemoryAccountStore {
    /// Creates a new, empty in-memory account store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn create(&self, account: Account) -> Result<bool> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.id) {
            return Ok(false);
        }
        accounts.insert(account.id.clone(), account);
        Ok(true)
    }

    async fn get(&self, id: &AccountId) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Account>> {
        let accounts = self.accounts.read().await;
        let mut all: Vec<Account> = accounts.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn compare_and_swap(&self, expected_version: u64, next: Account) -> Result<bool> {
        let mut accounts = self.accounts.write().await;
        match accounts.get_mut(&next.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// A thread-safe in-memory repository for orders or deposits, keyed by owner
/// and then by storage key.
///
/// Lock order is `records` then `deleted`.
pub struct InMemoryRecordRepository<R> {
    records: Arc<RwLock<HashMap<AccountId, BTreeMap<StorageKey, R>>>>,
    deleted: Arc<RwLock<HashSet<(AccountId, StorageKey)>>>,
    changes: broadcast::Sender<RecordChange>,
}

pub type InMemoryOrderRepository = InMemoryRecordRepository<Order>;
pub type InMemoryDepositRepository = InMemoryRecordRepository<Deposit>;

impl<R> Clone for InMemoryRecordRepository<R> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            deleted: Arc::clone(&self.deleted),
            changes: self.changes.clone(),
        }
    }
}

impl<R: LedgerRecord> Default for InMemoryRecordRepository<R> {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            records: Arc::default(),
            deleted: Arc::default(),
            changes,
        }
    }
}

impl<R: LedgerRecord> InMemoryRecordRepository<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn publish(&self, owner: &AccountId, key: &StorageKey, change: ChangeKind) {
        // No subscribers is not an error.
        let _ = self.changes.send(RecordChange {
            kind: R::KIND,
            owner: owner.clone(),
            key: key.clone(),
            change,
        });
    }
}

#[async_trait]
impl<R: LedgerRecord> RecordRepository<R> for InMemoryRecordRepository<R> {
    async fn create(&self, mut record: R) -> Result<R> {
        let key = StorageKey::generate();
        record.assign_key(key.clone());
        record.set_status(RecordStatus::Pending);

        let owner = record.owner().clone();
        {
            let mut records = self.records.write().await;
            records
                .entry(owner.clone())
                .or_default()
                .insert(key.clone(), record.clone());
        }
        self.publish(&owner, &key, ChangeKind::Created);
        Ok(record)
    }

    async fn get(&self, owner: &AccountId, key: &StorageKey) -> Result<Option<R>> {
        let records = self.records.read().await;
        Ok(records.get(owner).and_then(|r| r.get(key)).cloned())
    }

    async fn update_status(&self, owner: &AccountId, key: &StorageKey, status: RecordStatus) -> Result<()> {
        let previous = {
            let mut records = self.records.write().await;
            records.get_mut(owner).and_then(|r| r.get_mut(key)).map(|record| {
                let previous = record.status();
                record.set_status(status);
                previous
            })
        };
        if let Some(change) = previous.and_then(|p| ChangeKind::status_change(p, status)) {
            self.publish(owner, key, change);
        }
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        owner: &AccountId,
        key: &StorageKey,
        expected: RecordStatus,
        next: RecordStatus,
    ) -> Result<SwapOutcome> {
        let outcome = {
            let mut records = self.records.write().await;
            match records.get_mut(owner).and_then(|r| r.get_mut(key)) {
                Some(record) if record.status() == expected => {
                    record.set_status(next);
                    SwapOutcome::Swapped
                }
                Some(record) => SwapOutcome::Mismatch(record.status()),
                None => SwapOutcome::Missing,
            }
        };
        if outcome == SwapOutcome::Swapped {
            if let Some(change) = ChangeKind::status_change(expected, next) {
                self.publish(owner, key, change);
            }
        }
        Ok(outcome)
    }

    async fn delete(&self, owner: &AccountId, key: &StorageKey) -> Result<bool> {
        let removed = {
            let mut records = self.records.write().await;
            let removed = records
                .get_mut(owner)
                .and_then(|r| r.remove(key))
                .is_some();
            if removed {
                self.deleted
                    .write()
                    .await
                    .insert((owner.clone(), key.clone()));
            }
            removed
        };
        if removed {
            self.publish(owner, key, ChangeKind::Deleted);
        }
        Ok(removed)
    }

    async fn was_deleted(&self, owner: &AccountId, key: &StorageKey) -> Result<bool> {
        let deleted = self.deleted.read().await;
        Ok(deleted.contains(&(owner.clone(), key.clone())))
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<R>> {
        let records = self.records.read().await;
        let mut matching: Vec<R> = records
            .iter()
            .filter(|(owner, _)| filter.owner.as_ref().is_none_or(|o| o == *owner))
            .flat_map(|(_, by_key)| by_key.values())
            .filter(|r| filter.matches(*r))
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at());
        Ok(matching)
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.changes.subscribe()
    }
}

/// A thread-safe in-memory store for notifications.
#[derive(Default, Clone)]
pub struct InMemoryNotificationStore {
    notifications: Arc<RwLock<Vec<Notification>>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn push(&self, notification: Notification) -> Result<()> {
        let mut notifications = self.notifications.write().await;
        notifications.push(notification);
        Ok(())
    }

    async fn get(&self, id: &NotificationId) -> Result<Option<Notification>> {
        let notifications = self.notifications.read().await;
        Ok(notifications.iter().find(|n| &n.id == id).cloned())
    }

    async fn list_for(&self, account: &AccountId) -> Result<Vec<Notification>> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .iter()
            .rev()
            .filter(|n| n.target.includes(account))
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Notification>> {
        let notifications = self.notifications.read().await;
        Ok(notifications.iter().rev().cloned().collect())
    }

    async fn delete(&self, id: &NotificationId) -> Result<bool> {
        let mut notifications = self.notifications.write().await;
        let before = notifications.len();
        notifications.retain(|n| &n.id != id);
        Ok(notifications.len() != before)
    }
}

impl Stores {
    /// Wires every port to a fresh in-memory backend.
    pub fn in_memory() -> Self {
        Self::in_memory_with_attempts(DEFAULT_MAX_CAS_ATTEMPTS)
    }

    pub fn in_memory_with_attempts(max_attempts: u32) -> Self {
        Self {
            accounts: Arc::new(InMemoryAccountStore::new().with_max_attempts(max_attempts)),
            orders: Arc::new(InMemoryOrderRepository::new()),
            deposits: Arc::new(InMemoryDepositRepository::new()),
            notifications: Arc::new(InMemoryNotificationStore::new()),
        }
    }
}
