#![allow(dead_code)]

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rust_decimal::Decimal;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use topup_ledger::application::lifecycle::{Adjustment, LifecycleEngine};
use topup_ledger::application::notifier::NotificationDispatcher;
use topup_ledger::application::purchase::{PurchaseRequest, PurchaseService};
use topup_ledger::application::wallet::WalletService;
use topup_ledger::application::watcher::RefundWatcher;
use topup_ledger::config::SettingsHandle;
use topup_ledger::domain::account::{Account, AccountId, Amount};
use topup_ledger::domain::identifier::{Category, Destination};
use topup_ledger::domain::notification::Notification;
use topup_ledger::domain::order::{OfferSnapshot, Order};
use topup_ledger::domain::ports::{AccountStore, ClockRef, NotificationStore, Stores};
use topup_ledger::infrastructure::clock::ManualClock;

pub const HEADER: &str = "at,event,account,ref,amount,detail,pin";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap()
}

/// Every service wired against in-memory stores and a manual clock.
pub struct Harness {
    pub stores: Stores,
    pub settings: SettingsHandle,
    pub clock: ManualClock,
    pub engine: Arc<LifecycleEngine>,
    pub purchases: PurchaseService,
    pub wallet: WalletService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_stores(Stores::in_memory())
    }

    pub fn with_stores(stores: Stores) -> Self {
        let settings = SettingsHandle::default();
        let clock = ManualClock::new(start_time());
        let clock_ref: ClockRef = Arc::new(clock.clone());
        let notifier = NotificationDispatcher::new(
            stores.notifications.clone(),
            settings.clone(),
            clock_ref.clone(),
        );
        Self {
            engine: Arc::new(LifecycleEngine::new(stores.clone(), notifier, clock_ref.clone())),
            purchases: PurchaseService::new(stores.clone(), clock_ref.clone()),
            wallet: WalletService::new(stores.clone(), clock_ref),
            stores,
            settings,
            clock,
        }
    }

    pub fn watcher(&self) -> RefundWatcher {
        RefundWatcher::new(
            self.engine.clone(),
            self.settings.clone(),
            Arc::new(self.clock.clone()),
        )
    }

    /// Opens `id` and tops it up to `balance`.
    pub async fn account_with(&self, id: &str, balance: Decimal) -> AccountId {
        let id = AccountId::from(id);
        self.wallet.open_account(&id).await.unwrap();
        if balance > Decimal::ZERO {
            self.stores
                .accounts
                .mutate(&id, &|a: &Account| {
                    let mut next = a.clone();
                    next.credit(Amount::new(balance)?);
                    Ok(next)
                })
                .await
                .unwrap();
        }
        id
    }

    pub async fn buy(&self, account: &AccountId, price: Decimal) -> topup_ledger::error::Result<Order> {
        self.purchases.purchase(account, offer(price), None).await
    }

    pub async fn adjust(&self, account: &AccountId, direction: Adjustment, amount: Decimal) {
        self.engine
            .adjust_balance(account, direction, Amount::new(amount).unwrap())
            .await
            .unwrap();
    }

    pub async fn account(&self, id: &AccountId) -> Account {
        self.stores.accounts.get(id).await.unwrap().unwrap()
    }

    pub async fn balance(&self, id: &AccountId) -> Decimal {
        self.account(id).await.balance.0
    }

    pub async fn inbox(&self, id: &AccountId) -> Vec<Notification> {
        self.stores.notifications.list_for(id).await.unwrap()
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(TimeDelta::minutes(minutes));
    }
}

pub fn offer(price: Decimal) -> PurchaseRequest {
    PurchaseRequest {
        offer: OfferSnapshot {
            name: "115 Diamonds".to_string(),
            price: Amount::new(price).unwrap(),
            quantity: 115,
            category: Category::Uid,
        },
        destination: Destination::Player("12345678".to_string()),
    }
}

/// Writes an event CSV with the standard header to a temporary file.
pub fn events_file(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    file.flush().unwrap();
    file
}
