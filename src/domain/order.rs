use super::account::{AccountId, Amount};
use super::identifier::Category;
use super::record::{LedgerRecord, RecordStatus, StorageKey};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Snapshot of the offer at purchase time; later catalogue edits do not
/// change what was paid for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferSnapshot {
    pub name: String,
    pub price: Amount,
    /// Units delivered (diamonds, UC, ...).
    pub quantity: u32,
    pub category: Category,
}

/// A purchase of a virtual-currency package, paid from the wallet balance.
///
/// While `status` is `Pending` the price has already been debited and is in
/// flight: it ends up either spent (Completed) or returned (Failed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Human-readable eight-digit code shown to the buyer.
    pub id: String,
    pub storage_key: StorageKey,
    pub owner: AccountId,
    pub offer: OfferSnapshot,
    /// Destination account, already formatted for the offer category.
    pub identifier: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        owner: AccountId,
        offer: OfferSnapshot,
        identifier: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: generate_short_id(),
            storage_key: StorageKey::unassigned(),
            owner,
            offer,
            identifier,
            status: RecordStatus::Pending,
            created_at,
        }
    }

    pub fn price(&self) -> Amount {
        self.offer.price
    }
}

/// Random eight-digit numeric code.
pub fn generate_short_id() -> String {
    rand::thread_rng()
        .gen_range(10_000_000u32..100_000_000)
        .to_string()
}

impl LedgerRecord for Order {
    const KIND: &'static str = "order";

    fn storage_key(&self) -> &StorageKey {
        &self.storage_key
    }

    fn assign_key(&mut self, key: StorageKey) {
        self.storage_key = key;
    }

    fn owner(&self) -> &AccountId {
        &self.owner
    }

    fn status(&self) -> RecordStatus {
        self.status
    }

    fn set_status(&mut self, status: RecordStatus) {
        self.status = status;
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_short_id_is_eight_digits() {
        for _ in 0..100 {
            let id = generate_short_id();
            assert_eq!(id.len(), 8);
            assert!(id.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_new_order_is_pending_and_unstored() {
        let offer = OfferSnapshot {
            name: "100 Diamonds".into(),
            price: Amount::new(dec!(60)).unwrap(),
            quantity: 100,
            category: Category::Uid,
        };
        let order = Order::new("u1".into(), offer, "12345678".into(), Utc::now());
        assert_eq!(order.status, RecordStatus::Pending);
        assert!(!order.storage_key.is_assigned());
        assert_eq!(order.price().value(), dec!(60));
    }
}
