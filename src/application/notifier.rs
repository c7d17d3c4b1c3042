//! Creation of user-visible in-app notifications.

use crate::config::SettingsHandle;
use crate::domain::account::AccountId;
use crate::domain::notification::{
    LocalizedMessage, Notification, NotificationId, NotificationKind, Target,
};
use crate::domain::ports::{ClockRef, NotificationStore, NotificationStoreRef};
use crate::error::{LedgerError, Result};
use tracing::{debug, info, warn};

/// Why an order or deposit was failed, in both locales.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reason {
    pub en: String,
    pub bn: String,
}

impl Reason {
    pub fn new(en: impl Into<String>, bn: impl Into<String>) -> Self {
        Self {
            en: en.into(),
            bn: bn.into(),
        }
    }

    /// Same text in every locale.
    pub fn custom(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            en: text.clone(),
            bn: text,
        }
    }

    pub fn order_default() -> Self {
        Self::new("Information not correct.", "তথ্য সঠিক নয়।")
    }

    pub fn deposit_default() -> Self {
        Self::new("Transaction ID not valid.", "ট্রানজেকশন আইডি সঠিক নয়।")
    }
}

/// Fire-and-forget notification writer.
///
/// Store failures are logged and swallowed: a lost notification must never
/// undo or block the transition that produced it.
#[derive(Clone)]
pub struct NotificationDispatcher {
    store: NotificationStoreRef,
    settings: SettingsHandle,
    clock: ClockRef,
}

impl NotificationDispatcher {
    pub fn new(store: NotificationStoreRef, settings: SettingsHandle, clock: ClockRef) -> Self {
        Self {
            store,
            settings,
            clock,
        }
    }

    /// Creates a system-generated notification for `target`.
    ///
    /// Returns the id of the created notification, or `None` if it was
    /// suppressed by settings or could not be stored.
    pub async fn dispatch(
        &self,
        target: &AccountId,
        kind: NotificationKind,
        message: LocalizedMessage,
    ) -> Option<NotificationId> {
        if kind != NotificationKind::Admin && !self.settings.current().auto_notifications_enabled {
            debug!(account = %target, ?kind, "automatic notifications disabled, skipping");
            return None;
        }

        let notification = Notification::system(target.clone(), kind, message, self.clock.now());
        let id = notification.id.clone();
        match self.store.push(notification).await {
            Ok(()) => Some(id),
            Err(e) => {
                warn!(account = %target, ?kind, error = %e, "failed to store notification");
                None
            }
        }
    }

    /// Operator message to the given accounts, or to everyone when `targets` is empty.
    pub async fn broadcast(&self, targets: &[AccountId], message: LocalizedMessage) -> Result<usize> {
        let now = self.clock.now();
        if targets.is_empty() {
            self.store
                .push(Notification::operator(Target::Broadcast, message, now))
                .await?;
            info!("operator broadcast sent to all users");
            return Ok(1);
        }
        for target in targets {
            self.store
                .push(Notification::operator(
                    Target::User(target.clone()),
                    message.clone(),
                    now,
                ))
                .await?;
        }
        info!(recipients = targets.len(), "operator notification sent");
        Ok(targets.len())
    }

    pub async fn inbox(&self, account: &AccountId) -> Result<Vec<Notification>> {
        self.store.list_for(account).await
    }

    /// Deletes one of the user's own system-generated notifications.
    pub async fn delete(&self, account: &AccountId, id: &NotificationId) -> Result<()> {
        let notification = self
            .store
            .get(id)
            .await?
            .filter(|n| n.target == Target::User(account.clone()))
            .ok_or_else(|| LedgerError::not_found("notification", id.to_string()))?;
        if !notification.is_deletable() {
            return Err(LedgerError::Immutable(id.to_string()));
        }
        self.store.delete(id).await?;
        Ok(())
    }

    /// Deletes every system-generated notification addressed to the user.
    pub async fn clear(&self, account: &AccountId) -> Result<usize> {
        let mut removed = 0;
        for notification in self.store.list_for(account).await? {
            if notification.is_deletable() && self.store.delete(&notification.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

pub mod templates {
    use super::Reason;
    use crate::domain::account::Amount;
    use crate::domain::deposit::Deposit;
    use crate::domain::notification::{LocalizedMessage, Message};
    use crate::domain::order::Order;

    pub fn order_completed(order: &Order) -> LocalizedMessage {
        let name = &order.offer.name;
        LocalizedMessage {
            en: Message::new(
                "Order Successful!",
                format!("Your order for '{name}' completed successfully."),
            ),
            bn: Message::new(
                "অর্ডার সফল!",
                format!("আপনার '{name}' অর্ডারটি সফলভাবে সম্পন্ন হয়েছে।"),
            ),
        }
    }

    pub fn order_cancelled(order: &Order, reason: &Reason) -> LocalizedMessage {
        let name = &order.offer.name;
        LocalizedMessage {
            en: Message::new(
                "Order Cancelled",
                format!("Your order for '{name}' cancelled. Reason: {}", reason.en),
            ),
            bn: Message::new(
                "অর্ডার বাতিল",
                format!("আপনার '{name}' অর্ডারটি বাতিল হয়েছে। কারণ: {}", reason.bn),
            ),
        }
    }

    pub fn order_auto_refunded(order: &Order, minutes: u32) -> LocalizedMessage {
        let (id, price) = (&order.id, order.offer.price);
        LocalizedMessage {
            en: Message::new(
                "Order Auto-Refunded",
                format!(
                    "Order ID: {id} for ৳{price} was not processed within {minutes} mins and has been auto-refunded and deleted."
                ),
            ),
            bn: Message::new(
                "অর্ডার অটো-রিফান্ড",
                format!(
                    "অর্ডার আইডি: {id} (৳{price}) নির্দিষ্ট সময়ে সম্পন্ন না হওয়ায় এটি মুছে ফেলা হয়েছে এবং টাকা রিফান্ড করা হয়েছে।"
                ),
            ),
        }
    }

    pub fn deposit_approved(deposit: &Deposit) -> LocalizedMessage {
        let amount = deposit.amount;
        LocalizedMessage {
            en: Message::new(
                "Funds Added!",
                format!("৳{amount} added to your account. Thank you."),
            ),
            bn: Message::new(
                "টাকা যোগ হয়েছে!",
                format!("আপনার অ্যাকাউন্টে ৳{amount} যোগ করা হয়েছে। ধন্যবাদ।"),
            ),
        }
    }

    pub fn deposit_rejected(deposit: &Deposit, reason: &Reason) -> LocalizedMessage {
        let amount = deposit.amount;
        LocalizedMessage {
            en: Message::new(
                "Deposit Rejected",
                format!("Deposit request for ৳{amount} rejected. Reason: {}", reason.en),
            ),
            bn: Message::new(
                "ডিপোজিট বাতিল",
                format!(
                    "আপনার ৳{amount} জমার অনুরোধটি বাতিল হয়েছে। কারণ: {}",
                    reason.bn
                ),
            ),
        }
    }

    pub fn balance_update(amount: Amount, added: bool) -> LocalizedMessage {
        let (en_verb, bn_verb) = if added {
            ("added to", "যোগ")
        } else {
            ("deducted from", "কর্তন")
        };
        LocalizedMessage {
            en: Message::new(
                "Balance Update",
                format!("৳{amount} {en_verb} your balance."),
            ),
            bn: Message::new(
                "ব্যালেন্স আপডেট",
                format!("আপনার অ্যাকাউন্টে ৳{amount} {bn_verb} করা হয়েছে।"),
            ),
        }
    }
}
