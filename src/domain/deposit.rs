use super::account::{AccountId, Amount};
use super::record::{LedgerRecord, RecordStatus, StorageKey};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const MIN_DEPOSIT: Decimal = dec!(20);
pub const MAX_DEPOSIT: Decimal = dec!(10000);

/// A request to add balance through a manual mobile-payment transfer.
///
/// The balance is credited only on the transition into `Completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: String,
    pub storage_key: StorageKey,
    pub owner: AccountId,
    pub amount: Amount,
    /// Payment method name (bKash, Nagad, ...).
    pub method: String,
    /// Transaction id issued by the payment provider.
    pub external_reference: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

impl Deposit {
    /// Builds a pending deposit after applying the amount and reference policy.
    pub fn new(
        owner: AccountId,
        amount: Decimal,
        method: &str,
        reference: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        if !(MIN_DEPOSIT..=MAX_DEPOSIT).contains(&amount) {
            return Err(LedgerError::Validation(format!(
                "Deposit amount must be between {MIN_DEPOSIT} and {MAX_DEPOSIT}"
            )));
        }
        let method = method.trim();
        if method.is_empty() {
            return Err(LedgerError::Validation(
                "Payment method is required".to_string(),
            ));
        }
        let reference = normalize_reference(reference)?;
        Ok(Self {
            id: reference.clone(),
            storage_key: StorageKey::unassigned(),
            owner,
            amount: Amount::new(amount)?,
            method: method.to_string(),
            external_reference: reference,
            status: RecordStatus::Pending,
            created_at,
        })
    }
}

/// Upper-cases the reference, strips everything but ASCII alphanumerics and
/// checks the provider format: 8-10 characters and no character repeated
/// four or more times in a row.
pub fn normalize_reference(raw: &str) -> Result<String> {
    let reference: String = raw
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if reference.is_empty() {
        return Err(LedgerError::Validation(
            "Transaction ID is required".to_string(),
        ));
    }
    if !(8..=10).contains(&reference.len()) {
        return Err(LedgerError::Validation(
            "Transaction ID must be 8-10 characters".to_string(),
        ));
    }
    if longest_run(&reference) >= 4 {
        return Err(LedgerError::Validation(
            "Transaction ID looks invalid".to_string(),
        ));
    }
    Ok(reference)
}

fn longest_run(value: &str) -> usize {
    let mut longest = 0;
    let mut run = 0;
    let mut previous = None;
    for c in value.chars() {
        run = if previous == Some(c) { run + 1 } else { 1 };
        longest = longest.max(run);
        previous = Some(c);
    }
    longest
}

impl LedgerRecord for Deposit {
    const KIND: &'static str = "deposit";

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
