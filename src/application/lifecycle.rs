use super::notifier::{NotificationDispatcher, Reason, templates};
use crate::domain::account::{Account, AccountId, Amount, month_key};
use crate::domain::deposit::Deposit;
use crate::domain::notification::NotificationKind;
use crate::domain::order::Order;
use crate::domain::ports::{AccountStore, ClockRef, RecordRepository, Stores};
use crate::domain::record::{
    LedgerRecord, RecordFilter, RecordStatus, StatusCounts, StorageKey, SwapOutcome,
};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

/// Outcome of a lifecycle transition that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The record moved out of `Pending` and its money movement committed.
    Applied,
    /// The record was already resolved; nothing was changed.
    AlreadyTerminal(RecordStatus),
    /// Another caller holds the record while its balance update runs.
    InProgress,
    /// The record was resolved and removed by a concurrent caller.
    Removed,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Why an order is being failed. Decides the notification and whether the
/// record is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Operator rejection. The order is kept in history as `Failed`.
    Rejected(Reason),
    /// Refund watcher timeout. The order is removed after the refund.
    TimedOut { minutes: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Add,
    Deduct,
}

/// Operational counters for records created on the current (UTC) day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dashboard {
    pub orders: StatusCounts,
    pub deposits: StatusCounts,
    /// Sum of prices of today's completed orders.
    pub completed_volume: Decimal,
}

/// Drives orders and deposits from `Pending` to a terminal state together
/// with the paired balance mutation and owner notification.
///
/// Every transition first claims the record with a conditional
/// `Pending -> Settling` status swap. Only the caller that wins the claim moves
/// money. The terminal status is written after the balance update commits; if
/// the update fails the claim is released back to `Pending`. A record is
/// therefore never terminal without its balance effect, and a `Settling`
/// record cannot be deleted.
#[derive(Clone)]
pub struct LifecycleEngine {
    stores: Stores,
    notifier: NotificationDispatcher,
    clock: ClockRef,
}

impl LifecycleEngine {
    pub fn new(stores: Stores, notifier: NotificationDispatcher, clock: ClockRef) -> Self {
        Self {
            stores,
            notifier,
            clock,
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn notifier(&self) -> &NotificationDispatcher {
        &self.notifier
    }

    /// Operator approval: books the already-debited price as spent.
    pub async fn approve_order(&self, owner: &AccountId, key: &StorageKey) -> Result<Transition> {
        let Some(order) = self.load(self.orders(), owner, key).await? else {
            return Ok(Transition::Removed);
        };
        if let Some(outcome) = self.claim(self.orders(), &order).await? {
            return Ok(outcome);
        }

        let price = order.price();
        let month = month_key(self.clock.now());
        let booked = self
            .stores
            .accounts
            .mutate(owner, &|current: &Account| {
                let mut next = current.clone();
                next.book_spend(price, &month);
                Ok(next)
            })
            .await;
        if let Err(e) = booked {
            self.release(self.orders(), &order).await;
            return Err(e);
        }
        self.settle(self.orders(), &order, RecordStatus::Completed).await?;

        info!(account = %owner, key = %key, order_id = %order.id, %price, "order completed");
        self.notifier
            .dispatch(owner, NotificationKind::Success, templates::order_completed(&order))
            .await;
        Ok(Transition::Applied)
    }

    /// Operator rejection: refunds the price and keeps the order as `Failed`.
    pub async fn reject_order(
        &self,
        owner: &AccountId,
        key: &StorageKey,
        reason: Reason,
    ) -> Result<Transition> {
        self.fail_order(owner, key, FailureCause::Rejected(reason)).await
    }

    /// Timeout path used by the refund watcher: refunds the price and then
    /// deletes the order.
    pub async fn expire_order(
        &self,
        owner: &AccountId,
        key: &StorageKey,
        timeout_minutes: u32,
    ) -> Result<Transition> {
        self.fail_order(owner, key, FailureCause::TimedOut { minutes: timeout_minutes })
            .await
    }

    pub async fn fail_order(
        &self,
        owner: &AccountId,
        key: &StorageKey,
        cause: FailureCause,
    ) -> Result<Transition> {
        let Some(order) = self.load(self.orders(), owner, key).await? else {
            return Ok(Transition::Removed);
        };
        if let Some(outcome) = self.claim(self.orders(), &order).await? {
            return Ok(outcome);
        }

        let price = order.price();
        let refunded = self
            .stores
            .accounts
            .mutate(owner, &|current: &Account| {
                let mut next = current.clone();
                next.credit(price);
                Ok(next)
            })
            .await;
        if let Err(e) = refunded {
            self.release(self.orders(), &order).await;
            return Err(e);
        }
        self.settle(self.orders(), &order, RecordStatus::Failed).await?;

        let message = match &cause {
            FailureCause::Rejected(reason) => {
                info!(account = %owner, key = %key, order_id = %order.id, %price, "order rejected and refunded");
                templates::order_cancelled(&order, reason)
            }
            FailureCause::TimedOut { minutes } => {
                info!(account = %owner, key = %key, order_id = %order.id, %price, minutes, "order auto-refunded");
                // The refund has committed; a leftover Failed record is harmless.
                if let Err(e) = self.stores.orders.delete(owner, key).await {
                    warn!(account = %owner, key = %key, error = %e, "failed to delete auto-refunded order");
                }
                templates::order_auto_refunded(&order, *minutes)
            }
        };
        self.notifier
            .dispatch(owner, NotificationKind::Failed, message)
            .await;
        Ok(Transition::Applied)
    }

    /// Credits the deposit amount and books it in the deposit statistics.
    pub async fn approve_deposit(&self, owner: &AccountId, key: &StorageKey) -> Result<Transition> {
        let Some(deposit) = self.load(self.deposits(), owner, key).await? else {
            return Ok(Transition::Removed);
        };
        if let Some(outcome) = self.claim(self.deposits(), &deposit).await? {
            return Ok(outcome);
        }

        let amount = deposit.amount;
        let credited = self
            .stores
            .accounts
            .mutate(owner, &|current: &Account| {
                let mut next = current.clone();
                next.book_deposit(amount);
                Ok(next)
            })
            .await;
        if let Err(e) = credited {
            self.release(self.deposits(), &deposit).await;
            return Err(e);
        }
        self.settle(self.deposits(), &deposit, RecordStatus::Completed)
            .await?;

        info!(account = %owner, key = %key, reference = %deposit.external_reference, %amount, "deposit approved");
        self.notifier
            .dispatch(owner, NotificationKind::Success, templates::deposit_approved(&deposit))
            .await;
        Ok(Transition::Applied)
    }

    /// Marks the deposit `Failed`. No money was ever added, so nothing is moved.
    pub async fn reject_deposit(
        &self,
        owner: &AccountId,
        key: &StorageKey,
        reason: Reason,
    ) -> Result<Transition> {
        let Some(deposit) = self.load(self.deposits(), owner, key).await? else {
            return Ok(Transition::Removed);
        };
        if let Some(outcome) = self.claim(self.deposits(), &deposit).await? {
            return Ok(outcome);
        }
        self.settle(self.deposits(), &deposit, RecordStatus::Failed).await?;

        info!(account = %owner, key = %key, reference = %deposit.external_reference, "deposit rejected");
        self.notifier
            .dispatch(
                owner,
                NotificationKind::Failed,
                templates::deposit_rejected(&deposit, &reason),
            )
            .await;
        Ok(Transition::Applied)
    }

    /// Operator top-up or deduction. A deduction never takes the balance below zero.
    pub async fn adjust_balance(
        &self,
        owner: &AccountId,
        direction: Adjustment,
        amount: Amount,
    ) -> Result<Account> {
        let account = self
            .stores
            .accounts
            .mutate(owner, &|current: &Account| {
                let mut next = current.clone();
                match direction {
                    Adjustment::Add => next.credit(amount),
                    Adjustment::Deduct => next.debit(amount)?,
                }
                Ok(next)
            })
            .await?;

        info!(account = %owner, ?direction, %amount, balance = %account.balance, "balance adjusted by operator");
        self.notifier
            .dispatch(
                owner,
                NotificationKind::Admin,
                templates::balance_update(amount, direction == Adjustment::Add),
            )
            .await;
        Ok(account)
    }

    /// Removes a resolved order from history. Deleting twice is a no-op.
    pub async fn delete_order(&self, owner: &AccountId, key: &StorageKey) -> Result<()> {
        match self.load(self.orders(), owner, key).await? {
            Some(order) => self.delete_resolved(self.orders(), &order).await,
            None => Ok(()),
        }
    }

    /// Removes a resolved deposit from history. Deleting twice is a no-op.
    pub async fn delete_deposit(&self, owner: &AccountId, key: &StorageKey) -> Result<()> {
        match self.load(self.deposits(), owner, key).await? {
            Some(deposit) => self.delete_resolved(self.deposits(), &deposit).await,
            None => Ok(()),
        }
    }

    /// Counters for records created today.
    pub async fn dashboard(&self) -> Result<Dashboard> {
        let today = RecordFilter::all().created_on(self.clock.now().date_naive());
        let orders = self.stores.orders.list(&today).await?;
        let deposits = self.stores.deposits.list(&today).await?;

        let completed_volume = orders
            .iter()
            .filter(|o| o.status == RecordStatus::Completed)
            .map(|o| o.price().value())
            .sum();

        Ok(Dashboard {
            orders: StatusCounts::tally(&orders),
            deposits: StatusCounts::tally(&deposits),
            completed_volume,
        })
    }

    fn orders(&self) -> &dyn RecordRepository<Order> {
        self.stores.orders.as_ref()
    }

    fn deposits(&self) -> &dyn RecordRepository<Deposit> {
        self.stores.deposits.as_ref()
    }

    /// Reads a record. `None` means it existed and has been deleted since;
    /// a key that never held a record is `NotFound`.
    async fn load<R: LedgerRecord>(
        &self,
        repo: &dyn RecordRepository<R>,
        owner: &AccountId,
        key: &StorageKey,
    ) -> Result<Option<R>> {
        if let Some(record) = repo.get(owner, key).await? {
            return Ok(Some(record));
        }
        if repo.was_deleted(owner, key).await? {
            debug!(kind = R::KIND, key = %key, "record already deleted");
            return Ok(None);
        }
        Err(LedgerError::not_found(R::KIND, key.as_str()))
    }

    /// Swaps `Pending -> Settling`. `None` means the caller now owns the
    /// record and must `settle` or `release` it; `Some` is the idempotent
    /// outcome to return unchanged.
    async fn claim<R: LedgerRecord>(
        &self,
        repo: &dyn RecordRepository<R>,
        record: &R,
    ) -> Result<Option<Transition>> {
        let key = record.storage_key();
        if record.status() != RecordStatus::Pending {
            debug!(kind = R::KIND, key = %key, status = %record.status(), "not pending");
            return Ok(Some(unclaimable(record.status())));
        }
        let outcome = repo
            .compare_and_set_status(
                record.owner(),
                key,
                RecordStatus::Pending,
                RecordStatus::Settling,
            )
            .await?;
        match outcome {
            SwapOutcome::Swapped => Ok(None),
            SwapOutcome::Mismatch(status) => {
                debug!(kind = R::KIND, key = %key, %status, "claimed concurrently");
                Ok(Some(unclaimable(status)))
            }
            SwapOutcome::Missing => {
                debug!(kind = R::KIND, key = %key, "removed concurrently");
                Ok(Some(Transition::Removed))
            }
        }
    }

    /// Publishes the terminal status of a claimed record after its balance
    /// update committed.
    async fn settle<R: LedgerRecord>(
        &self,
        repo: &dyn RecordRepository<R>,
        record: &R,
        target: RecordStatus,
    ) -> Result<()> {
        let key = record.storage_key();
        let outcome = repo
            .compare_and_set_status(record.owner(), key, RecordStatus::Settling, target)
            .await?;
        if outcome != SwapOutcome::Swapped {
            error!(kind = R::KIND, key = %key, %target, ?outcome, "claimed record changed before settling");
        }
        Ok(())
    }

    /// Gives a claimed record back after its balance update failed.
    async fn release<R: LedgerRecord>(&self, repo: &dyn RecordRepository<R>, record: &R) {
        let key = record.storage_key();
        match repo
            .compare_and_set_status(
                record.owner(),
                key,
                RecordStatus::Settling,
                RecordStatus::Pending,
            )
            .await
        {
            Ok(SwapOutcome::Swapped) => {
                warn!(kind = R::KIND, key = %key, "balance update failed, record returned to Pending");
            }
            Ok(other) => {
                error!(kind = R::KIND, key = %key, outcome = ?other, "could not return record to Pending");
            }
            Err(e) => {
                error!(kind = R::KIND, key = %key, error = %e, "could not return record to Pending");
            }
        }
    }

    async fn delete_resolved<R: LedgerRecord>(
        &self,
        repo: &dyn RecordRepository<R>,
        record: &R,
    ) -> Result<()> {
        let key = record.storage_key();
        if !record.status().is_terminal() {
            return Err(LedgerError::StillPending {
                kind: R::KIND,
                key: key.to_string(),
            });
        }
        if !repo.delete(record.owner(), key).await? {
            debug!(kind = R::KIND, key = %key, "removed concurrently");
            return Ok(());
        }
        info!(kind = R::KIND, account = %record.owner(), key = %key, "record deleted by operator");
        Ok(())
    }
}

fn unclaimable(status: RecordStatus) -> Transition {
    match status {
        RecordStatus::Settling => Transition::InProgress,
        status => Transition::AlreadyTerminal(status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsHandle;
    use crate::domain::account::Balance;
    use crate::domain::identifier::Category;
    use crate::domain::order::OfferSnapshot;
    use crate::domain::ports::{Clock, NotificationStore};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::InMemoryAccountStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, OnceLock};

    struct Fixture {
        engine: LifecycleEngine,
        stores: Stores,
        clock: ManualClock,
    }

    async fn fixture(balance: Decimal) -> Fixture {
        fixture_with(Stores::in_memory(), balance).await
    }

    async fn fixture_with(stores: Stores, balance: Decimal) -> Fixture {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap());
        let clock_ref: ClockRef = Arc::new(clock.clone());
        let notifier = NotificationDispatcher::new(
            stores.notifications.clone(),
            SettingsHandle::default(),
            clock_ref.clone(),
        );
        let mut account = Account::new("u1".into());
        account.balance = Balance::new(balance);
        stores.accounts.create(account).await.unwrap();
        Fixture {
            engine: LifecycleEngine::new(stores.clone(), notifier, clock_ref),
            stores,
            clock,
        }
    }

    /// Places an order the way the purchase flow does: debit, then create.
    async fn place_order(f: &Fixture, price: Decimal) -> Order {
        let amount = Amount::new(price).unwrap();
        f.stores
            .accounts
            .mutate(&"u1".into(), &|a: &Account| {
                let mut next = a.clone();
                next.debit(amount)?;
                Ok(next)
            })
            .await
            .unwrap();
        let offer = OfferSnapshot {
            name: "100 Diamonds".to_string(),
            price: amount,
            quantity: 100,
            category: Category::Uid,
        };
        let order = Order::new("u1".into(), offer, "12345678".to_string(), f.clock.now());
        f.stores.orders.create(order).await.unwrap()
    }

    async fn balance(f: &Fixture) -> Balance {
        f.stores.accounts.get(&"u1".into()).await.unwrap().unwrap().balance
    }

    /// Account store whose commits always lose the version race while
    /// `conflicting` is set. The first lost commit tries to delete `meddle`'s
    /// order from under the running transition.
    #[derive(Default)]
    struct Contended {
        inner: InMemoryAccountStore,
        conflicting: AtomicBool,
        meddle: OnceLock<(LifecycleEngine, StorageKey)>,
        delete_attempt: Mutex<Option<Result<()>>>,
    }

    #[async_trait]
    impl AccountStore for Contended {
        async fn create(&self, account: Account) -> Result<bool> {
            self.inner.create(account).await
        }

        async fn get(&self, id: &AccountId) -> Result<Option<Account>> {
            self.inner.get(id).await
        }

        async fn get_all(&self) -> Result<Vec<Account>> {
            self.inner.get_all().await
        }

        async fn compare_and_swap(&self, expected_version: u64, next: Account) -> Result<bool> {
            if !self.conflicting.load(Ordering::SeqCst) {
                return self.inner.compare_and_swap(expected_version, next).await;
            }
            if let Some((engine, key)) = self.meddle.get() {
                let first = self.delete_attempt.lock().unwrap().is_none();
                if first {
                    let attempt = engine.delete_order(&"u1".into(), key).await;
                    *self.delete_attempt.lock().unwrap() = Some(attempt);
                }
            }
            Ok(false)
        }

        fn max_attempts(&self) -> u32 {
            3
        }
    }

    async fn contended_fixture(balance: Decimal) -> (Fixture, Arc<Contended>) {
        let contended = Arc::new(Contended::default());
        let stores = Stores {
            accounts: contended.clone(),
            ..Stores::in_memory()
        };
        (fixture_with(stores, balance).await, contended)
    }

    #[tokio::test]
    async fn test_reject_refunds_and_keeps_order() {
        let f = fixture(dec!(100)).await;
        let order = place_order(&f, dec!(60)).await;
        assert_eq!(balance(&f).await, Balance::new(dec!(40)));

        let outcome = f
            .engine
            .reject_order(&order.owner, &order.storage_key, Reason::order_default())
            .await
            .unwrap();
        assert_eq!(outcome, Transition::Applied);
        assert_eq!(balance(&f).await, Balance::new(dec!(100)));

        let stored = f.stores.orders.get(&order.owner, &order.storage_key).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::Failed);
        let inbox = f.stores.notifications.list_for(&"u1".into()).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].message.en.title, "Order Cancelled");
    }

    #[tokio::test]
    async fn test_second_rejection_is_a_no_op() {
        let f = fixture(dec!(100)).await;
        let order = place_order(&f, dec!(60)).await;

        f.engine
            .reject_order(&order.owner, &order.storage_key, Reason::order_default())
            .await
            .unwrap();
        let second = f
            .engine
            .reject_order(&order.owner, &order.storage_key, Reason::order_default())
            .await
            .unwrap();
        assert_eq!(second, Transition::AlreadyTerminal(RecordStatus::Failed));
        assert_eq!(balance(&f).await, Balance::new(dec!(100)));
    }

    #[tokio::test]
    async fn test_approval_books_spend_once() {
        let f = fixture(dec!(100)).await;
        let order = place_order(&f, dec!(60)).await;

        assert!(f.engine.approve_order(&order.owner, &order.storage_key).await.unwrap().is_applied());
        assert!(!f.engine.approve_order(&order.owner, &order.storage_key).await.unwrap().is_applied());

        let account = f.stores.accounts.get(&"u1".into()).await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(dec!(40)));
        assert_eq!(account.total_spent, Balance::new(dec!(60)));
        assert_eq!(account.monthly_spent, Balance::new(dec!(60)));
        assert_eq!(account.month_key.as_deref(), Some("2026-10"));
    }

    #[tokio::test]
    async fn test_reject_after_approve_does_not_refund() {
        let f = fixture(dec!(100)).await;
        let order = place_order(&f, dec!(60)).await;

        f.engine.approve_order(&order.owner, &order.storage_key).await.unwrap();
        let outcome = f
            .engine
            .reject_order(&order.owner, &order.storage_key, Reason::order_default())
            .await
            .unwrap();
        assert_eq!(outcome, Transition::AlreadyTerminal(RecordStatus::Completed));
        assert_eq!(balance(&f).await, Balance::new(dec!(40)));
    }

    #[tokio::test]
    async fn test_expire_refunds_and_deletes() {
        let f = fixture(dec!(100)).await;
        let order = place_order(&f, dec!(60)).await;

        let outcome = f.engine.expire_order(&order.owner, &order.storage_key, 30).await.unwrap();
        assert_eq!(outcome, Transition::Applied);
        assert_eq!(balance(&f).await, Balance::new(dec!(100)));
        assert!(f.stores.orders.get(&order.owner, &order.storage_key).await.unwrap().is_none());

        let inbox = f.stores.notifications.list_for(&"u1".into()).await.unwrap();
        assert_eq!(inbox[0].message.en.title, "Order Auto-Refunded");
        assert!(inbox[0].message.en.body.contains("30 mins"));
    }

    #[tokio::test]
    async fn test_late_callers_see_auto_refunded_order_as_removed() {
        let f = fixture(dec!(100)).await;
        let order = place_order(&f, dec!(60)).await;
        f.engine.expire_order(&order.owner, &order.storage_key, 30).await.unwrap();

        let rejected = f
            .engine
            .reject_order(&order.owner, &order.storage_key, Reason::order_default())
            .await
            .unwrap();
        assert_eq!(rejected, Transition::Removed);
        let approved = f.engine.approve_order(&order.owner, &order.storage_key).await.unwrap();
        assert_eq!(approved, Transition::Removed);
        f.engine.delete_order(&order.owner, &order.storage_key).await.unwrap();
        assert_eq!(balance(&f).await, Balance::new(dec!(100)));

        let never = f.engine.reject_order(&order.owner, &"never".into(), Reason::order_default()).await;
        assert!(matches!(never, Err(LedgerError::NotFound { kind: "order", .. })));
    }

    #[tokio::test]
    async fn test_settling_record_is_left_alone() {
        let f = fixture(dec!(100)).await;
        let order = place_order(&f, dec!(60)).await;
        f.stores
            .orders
            .update_status(&order.owner, &order.storage_key, RecordStatus::Settling)
            .await
            .unwrap();

        let outcome = f
            .engine
            .reject_order(&order.owner, &order.storage_key, Reason::order_default())
            .await
            .unwrap();
        assert_eq!(outcome, Transition::InProgress);
        assert!(!outcome.is_applied());
        assert_eq!(balance(&f).await, Balance::new(dec!(40)));

        let deleted = f.engine.delete_order(&order.owner, &order.storage_key).await;
        assert!(matches!(deleted, Err(LedgerError::StillPending { .. })));
        let listed = f.stores.orders.list(&RecordFilter::pending()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(f.engine.dashboard().await.unwrap().orders.pending, 1);
    }

    #[tokio::test]
    async fn test_contended_refund_keeps_order_pending_and_undeletable() {
        let (f, contended) = contended_fixture(dec!(100)).await;
        let order = place_order(&f, dec!(60)).await;
        let _ = contended
            .meddle
            .set((f.engine.clone(), order.storage_key.clone()));
        contended.conflicting.store(true, Ordering::SeqCst);

        let result = f
            .engine
            .reject_order(&order.owner, &order.storage_key, Reason::order_default())
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::ConcurrencyExhausted { attempts: 3, .. })
        ));
        // The delete ran while the refund was in flight.
        let attempt = contended.delete_attempt.lock().unwrap().take();
        assert!(matches!(attempt, Some(Err(LedgerError::StillPending { .. }))));

        assert_eq!(balance(&f).await, Balance::new(dec!(40)));
        let stored = f.stores.orders.get(&order.owner, &order.storage_key).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::Pending);
        assert!(f.stores.notifications.list_for(&"u1".into()).await.unwrap().is_empty());

        contended.conflicting.store(false, Ordering::SeqCst);
        let retried = f
            .engine
            .reject_order(&order.owner, &order.storage_key, Reason::order_default())
            .await
            .unwrap();
        assert_eq!(retried, Transition::Applied);
        assert_eq!(balance(&f).await, Balance::new(dec!(100)));
    }

    #[tokio::test]
    async fn test_contended_deposit_approval_credits_nothing() {
        let (f, contended) = contended_fixture(dec!(10)).await;
        let deposit =
            Deposit::new("u1".into(), dec!(500), "bKash", "AB12CD34", f.clock.now()).unwrap();
        let deposit = f.stores.deposits.create(deposit).await.unwrap();
        contended.conflicting.store(true, Ordering::SeqCst);

        let result = f.engine.approve_deposit(&deposit.owner, &deposit.storage_key).await;
        assert!(matches!(result, Err(LedgerError::ConcurrencyExhausted { .. })));
        assert!(result.unwrap_err().is_transient());

        let account = f.stores.accounts.get(&"u1".into()).await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(dec!(10)));
        assert_eq!(account.total_deposit, Balance::new(dec!(0)));
        let stored = f.stores.deposits.get(&deposit.owner, &deposit.storage_key).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::Pending);
    }

    #[tokio::test]
    async fn test_failed_refund_returns_order_to_pending() {
        let f = fixture(dec!(100)).await;
        let order = place_order(&f, dec!(60)).await;
        // Reassign the order to an account that does not exist so the refund fails.
        let mut orphan = order.clone();
        orphan.owner = "ghost".into();
        orphan.storage_key = StorageKey::unassigned();
        let orphan = f.stores.orders.create(orphan).await.unwrap();

        let result = f
            .engine
            .reject_order(&orphan.owner, &orphan.storage_key, Reason::order_default())
            .await;
        assert!(matches!(result, Err(LedgerError::NotFound { kind: "account", .. })));
        let stored = f.stores.orders.get(&orphan.owner, &orphan.storage_key).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::Pending);
    }

    #[tokio::test]
    async fn test_deposit_approval_credits_balance() {
        let f = fixture(dec!(0)).await;
        let deposit =
            Deposit::new("u1".into(), dec!(500), "bKash", "AB12CD34", f.clock.now()).unwrap();
        let deposit = f.stores.deposits.create(deposit).await.unwrap();

        f.engine.approve_deposit(&deposit.owner, &deposit.storage_key).await.unwrap();
        f.engine.approve_deposit(&deposit.owner, &deposit.storage_key).await.unwrap();

        let account = f.stores.accounts.get(&"u1".into()).await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(dec!(500)));
        assert_eq!(account.total_deposit, Balance::new(dec!(500)));
        let inbox = f.stores.notifications.list_for(&"u1".into()).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].message.en.title, "Funds Added!");
    }

    #[tokio::test]
    async fn test_deposit_rejection_moves_no_money() {
        let f = fixture(dec!(10)).await;
        let deposit =
            Deposit::new("u1".into(), dec!(500), "Nagad", "ZX98CV76", f.clock.now()).unwrap();
        let deposit = f.stores.deposits.create(deposit).await.unwrap();

        f.engine
            .reject_deposit(&deposit.owner, &deposit.storage_key, Reason::deposit_default())
            .await
            .unwrap();
        assert_eq!(balance(&f).await, Balance::new(dec!(10)));
        let inbox = f.stores.notifications.list_for(&"u1".into()).await.unwrap();
        assert!(inbox[0].message.en.body.contains("Transaction ID not valid."));
    }

    #[tokio::test]
    async fn test_operator_deduct_cannot_overdraw() {
        let f = fixture(dec!(50)).await;
        let amount = Amount::new(dec!(80)).unwrap();

        let result = f.engine.adjust_balance(&"u1".into(), Adjustment::Deduct, amount).await;
        assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
        assert_eq!(balance(&f).await, Balance::new(dec!(50)));

        let account = f
            .engine
            .adjust_balance(&"u1".into(), Adjustment::Add, amount)
            .await
            .unwrap();
        assert_eq!(account.balance, Balance::new(dec!(130)));
        let inbox = f.stores.notifications.list_for(&"u1".into()).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::Admin);
    }

    #[tokio::test]
    async fn test_pending_records_cannot_be_deleted() {
        let f = fixture(dec!(100)).await;
        let order = place_order(&f, dec!(60)).await;

        let result = f.engine.delete_order(&order.owner, &order.storage_key).await;
        assert!(matches!(result, Err(LedgerError::StillPending { .. })));

        f.engine.approve_order(&order.owner, &order.storage_key).await.unwrap();
        f.engine.delete_order(&order.owner, &order.storage_key).await.unwrap();
        assert!(f.stores.orders.get(&order.owner, &order.storage_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dashboard_counts_today_only() {
        let f = fixture(dec!(1000)).await;
        let yesterday = place_order(&f, dec!(10)).await;
        f.engine.approve_order(&yesterday.owner, &yesterday.storage_key).await.unwrap();

        f.clock.advance(chrono::TimeDelta::days(1));
        let a = place_order(&f, dec!(60)).await;
        let b = place_order(&f, dec!(40)).await;
        place_order(&f, dec!(25)).await;
        f.engine.approve_order(&a.owner, &a.storage_key).await.unwrap();
        f.engine.approve_order(&b.owner, &b.storage_key).await.unwrap();

        let dashboard = f.engine.dashboard().await.unwrap();
        assert_eq!(dashboard.orders.completed, 2);
        assert_eq!(dashboard.orders.pending, 1);
        assert_eq!(dashboard.completed_volume, dec!(100));
    }
}
