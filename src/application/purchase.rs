//! Purchase confirmation: validate, authenticate, debit, then create the order.

use crate::domain::account::{Account, AccountId, Amount};
use crate::domain::identifier::Destination;
use crate::domain::order::{OfferSnapshot, Order};
use crate::domain::ports::{AccountStore, ClockRef, RecordRepository, Stores};
use crate::error::{LedgerError, Result};
use tracing::{debug, error, info};

/// Client-observable purchase state.
///
/// Transitions are pure; calling one from a state it does not apply to
/// returns the state unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseFlow {
    Idle,
    AwaitingPin,
    Processing,
    Settled(Settlement),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Placed { order_id: String },
    Aborted(AbortReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    InsufficientFunds,
    /// The store failed; nothing was charged.
    Unavailable,
}

impl PurchaseFlow {
    /// Buyer confirmed the purchase.
    pub fn confirm(self, pin_required: bool) -> Self {
        match self {
            Self::Idle if pin_required => Self::AwaitingPin,
            Self::Idle => Self::Processing,
            other => other,
        }
    }

    /// A wrong PIN keeps the flow waiting for another attempt.
    pub fn submit_pin(self, accepted: bool) -> Self {
        match self {
            Self::AwaitingPin if accepted => Self::Processing,
            other => other,
        }
    }

    pub fn settle(self, settlement: Settlement) -> Self {
        match self {
            Self::Processing => Self::Settled(settlement),
            other => other,
        }
    }

    /// Back to `Idle` once the buyer dismisses the result or cancels the PIN prompt.
    pub fn reset(self) -> Self {
        match self {
            Self::Processing => Self::Processing,
            _ => Self::Idle,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }
}

#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub offer: OfferSnapshot,
    pub destination: Destination,
}

#[derive(Clone)]
pub struct PurchaseService {
    stores: Stores,
    clock: ClockRef,
}

impl PurchaseService {
    pub fn new(stores: Stores, clock: ClockRef) -> Self {
        Self { stores, clock }
    }

    /// Charges `account` for the offer and creates a pending order.
    ///
    /// Nothing is debited or created when the destination is malformed, the
    /// PIN is wrong or the balance is insufficient.
    pub async fn purchase(
        &self,
        account: &AccountId,
        request: PurchaseRequest,
        pin: Option<&str>,
    ) -> Result<Order> {
        let identifier = request.destination.validate(request.offer.category)?;
        let snapshot = self
            .stores
            .accounts
            .get(account)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", account.as_str()))?;

        let mut flow = PurchaseFlow::Idle.confirm(snapshot.has_pin());
        if flow == PurchaseFlow::AwaitingPin {
            let accepted = match (&snapshot.pin, pin) {
                (Some(stored), Some(entered)) => stored.matches(entered),
                _ => false,
            };
            if !accepted {
                debug!(account = %account, "purchase rejected: wrong PIN");
                return Err(LedgerError::Authentication);
            }
            flow = flow.submit_pin(true);
        }

        let price = request.offer.price;
        let debited = self
            .stores
            .accounts
            .mutate(account, &|current: &Account| {
                let mut next = current.clone();
                next.debit(price)?;
                Ok(next)
            })
            .await;
        if let Err(e) = debited {
            let reason = match e {
                LedgerError::InsufficientFunds { .. } => AbortReason::InsufficientFunds,
                _ => AbortReason::Unavailable,
            };
            flow = flow.settle(Settlement::Aborted(reason));
            debug!(account = %account, %price, ?flow, "purchase aborted");
            return Err(e);
        }

        let order = Order::new(account.clone(), request.offer, identifier, self.clock.now());
        let order = match self.stores.orders.create(order).await {
            Ok(order) => order,
            Err(e) => {
                self.refund_unplaced(account, price).await;
                return Err(e);
            }
        };

        flow = flow.settle(Settlement::Placed {
            order_id: order.id.clone(),
        });
        info!(
            account = %account,
            key = %order.storage_key,
            order_id = %order.id,
            %price,
            settled = flow.is_settled(),
            "order placed"
        );
        Ok(order)
    }

    /// Returns the debit when the order could not be stored.
    async fn refund_unplaced(&self, account: &AccountId, price: Amount) {
        let refunded = self
            .stores
            .accounts
            .mutate(account, &|current: &Account| {
                let mut next = current.clone();
                next.credit(price);
                Ok(next)
            })
            .await;
        match refunded {
            Ok(_) => info!(account = %account, %price, "order creation failed, debit returned"),
            Err(e) => error!(account = %account, %price, error = %e, "order creation failed and debit could not be returned"),
        }
    }
}
