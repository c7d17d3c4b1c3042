//! Drives the services from a stream of timestamped events.

use super::csv::event_reader::{Event, SettingsChange};
use crate::application::lifecycle::{LifecycleEngine, Transition};
use crate::application::notifier::{NotificationDispatcher, Reason};
use crate::application::purchase::{PurchaseRequest, PurchaseService};
use crate::application::wallet::WalletService;
use crate::application::watcher::{RefundWatcher, SweepReport};
use crate::config::SettingsHandle;
use crate::domain::account::{Account, AccountId};
use crate::domain::order::OfferSnapshot;
use crate::domain::ports::{AccountStore, ClockRef, Stores};
use crate::domain::record::StorageKey;
use crate::error::{LedgerError, Result};
use crate::infrastructure::clock::ManualClock;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Wires every service against one set of stores and a manual clock that is
/// moved to each event's timestamp before the event is applied.
pub struct Replayer {
    clock: ManualClock,
    settings: SettingsHandle,
    stores: Stores,
    engine: Arc<LifecycleEngine>,
    purchases: PurchaseService,
    wallet: WalletService,
    watcher: RefundWatcher,
    orders: HashMap<String, (AccountId, StorageKey)>,
    deposits: HashMap<String, (AccountId, StorageKey)>,
}

impl Replayer {
    pub fn new(stores: Stores, settings: SettingsHandle, start: DateTime<Utc>) -> Self {
        let clock = ManualClock::new(start);
        let clock_ref: ClockRef = Arc::new(clock.clone());
        let notifier = NotificationDispatcher::new(
            stores.notifications.clone(),
            settings.clone(),
            clock_ref.clone(),
        );
        let engine = Arc::new(LifecycleEngine::new(
            stores.clone(),
            notifier,
            clock_ref.clone(),
        ));
        Self {
            purchases: PurchaseService::new(stores.clone(), clock_ref.clone()),
            wallet: WalletService::new(stores.clone(), clock_ref.clone()),
            watcher: RefundWatcher::new(engine.clone(), settings.clone(), clock_ref),
            engine,
            clock,
            settings,
            stores,
            orders: HashMap::new(),
            deposits: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &LifecycleEngine {
        &self.engine
    }

    /// Applies one event at time `at`.
    pub async fn apply(&mut self, at: DateTime<Utc>, event: Event) -> Result<()> {
        self.clock.set(at);
        match event {
            Event::Open { account } => {
                if !self.wallet.open_account(&account).await? {
                    debug!(account = %account, "account already open");
                }
            }
            Event::SetPin { account, pin } => match pin {
                Some(pin) => self.wallet.set_pin(&account, &pin).await?,
                None => self.wallet.clear_pin(&account).await?,
            },
            Event::Purchase {
                account,
                alias,
                category,
                price,
                destination,
                pin,
            } => {
                let request = PurchaseRequest {
                    offer: OfferSnapshot {
                        name: format!("{category:?} {price}"),
                        price,
                        quantity: 1,
                        category,
                    },
                    destination,
                };
                let order = self
                    .purchases
                    .purchase(&account, request, pin.as_deref())
                    .await?;
                self.orders.insert(alias, (account, order.storage_key));
            }
            Event::Deposit {
                account,
                alias,
                amount,
                method,
                reference,
            } => {
                let deposit = self
                    .wallet
                    .submit_deposit(&account, amount, &method, &reference)
                    .await?;
                self.deposits.insert(alias, (account, deposit.storage_key));
            }
            Event::ApproveOrder { alias } => {
                let (owner, key) = lookup(&self.orders, "order", &alias)?;
                log_outcome(&alias, self.engine.approve_order(owner, key).await?);
            }
            Event::RejectOrder { alias, reason } => {
                let (owner, key) = lookup(&self.orders, "order", &alias)?;
                let reason = reason.map(Reason::custom).unwrap_or_else(Reason::order_default);
                log_outcome(&alias, self.engine.reject_order(owner, key, reason).await?);
            }
            Event::ApproveDeposit { alias } => {
                let (owner, key) = lookup(&self.deposits, "deposit", &alias)?;
                log_outcome(&alias, self.engine.approve_deposit(owner, key).await?);
            }
            Event::RejectDeposit { alias, reason } => {
                let (owner, key) = lookup(&self.deposits, "deposit", &alias)?;
                let reason = reason.map(Reason::custom).unwrap_or_else(Reason::deposit_default);
                log_outcome(&alias, self.engine.reject_deposit(owner, key, reason).await?);
            }
            Event::Adjust {
                account,
                direction,
                amount,
            } => {
                self.engine.adjust_balance(&account, direction, amount).await?;
            }
            Event::Sweep => {
                let SweepReport {
                    scanned, refunded, ..
                } = self.watcher.tick().await?;
                info!(scanned, refunded, "sweep replayed");
            }
            Event::Settings(change) => self.apply_settings(change),
        }
        Ok(())
    }

    fn apply_settings(&self, change: SettingsChange) {
        self.settings.update(|s| {
            if let Some(enabled) = change.auto_refund_enabled {
                s.auto_refund_enabled = enabled;
            }
            if let Some(minutes) = change.auto_refund_timeout_minutes {
                s.auto_refund_timeout_minutes = minutes;
            }
            if let Some(enabled) = change.auto_notifications_enabled {
                s.auto_notifications_enabled = enabled;
            }
        });
        info!(settings = ?self.settings.current(), "settings changed");
    }

    /// Final state of every account, ordered by id.
    pub async fn into_accounts(self) -> Result<Vec<Account>> {
        self.stores.accounts.get_all().await
    }
}

fn lookup<'a>(
    aliases: &'a HashMap<String, (AccountId, StorageKey)>,
    kind: &'static str,
    alias: &str,
) -> Result<(&'a AccountId, &'a StorageKey)> {
    aliases
        .get(alias)
        .map(|(owner, key)| (owner, key))
        .ok_or_else(|| LedgerError::not_found(kind, alias))
}

fn log_outcome(alias: &str, outcome: Transition) {
    if !outcome.is_applied() {
        debug!(alias, ?outcome, "transition was a no-op");
    }
}
