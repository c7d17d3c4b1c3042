use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Represents a signed monetary value held on an account.
///
/// This is a wrapper around `rust_decimal::Decimal` to enforce domain-specific rules
/// and provide type safety for wallet arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub Decimal);

/// Represents a positive monetary amount moved by a purchase, deposit, refund or adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(LedgerError::Validation(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// Opaque identifier of the user owning an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A 4-digit secret gating purchases.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pin(String);

impl Pin {
    pub fn new(pin: &str) -> Result<Self> {
        if pin.len() == 4 && pin.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(pin.to_string()))
        } else {
            Err(LedgerError::Validation(
                "PIN must be exactly 4 digits".to_string(),
            ))
        }
    }

    pub fn matches(&self, entered: &str) -> bool {
        self.0 == entered
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(****)")
    }
}

/// Calendar month key (`YYYY-MM`) used to roll monthly counters over.
pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// The balance-bearing record tied to one end user.
///
/// `version` is bumped by the account store on every committed mutation and is
/// what compare-and-swap commits are checked against.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Account {
    pub id: AccountId,
    pub balance: Balance,
    pub total_spent: Balance,
    pub total_deposit: Balance,
    pub monthly_spent: Balance,
    pub monthly_earned: Balance,
    /// Month the monthly counters belong to.
    pub month_key: Option<String>,
    pub pin: Option<Pin>,
    #[serde(default)]
    pub version: u64,
}

impl Account {
    pub fn new(id: AccountId) -> Self {
        Self {
            id,
            balance: Balance::ZERO,
            total_spent: Balance::ZERO,
            total_deposit: Balance::ZERO,
            monthly_spent: Balance::ZERO,
            monthly_earned: Balance::ZERO,
            month_key: None,
            pin: None,
            version: 0,
        }
    }

    pub fn has_pin(&self) -> bool {
        self.pin.is_some()
    }

    /// Adds funds to the balance (refunds, operator top-ups).
    pub fn credit(&mut self, amount: Amount) {
        self.balance += amount.into();
    }

    /// Removes funds from the balance if sufficient.
    pub fn debit(&mut self, amount: Amount) -> Result<()> {
        if self.balance >= amount.into() {
            self.balance -= amount.into();
            Ok(())
        } else {
            Err(LedgerError::InsufficientFunds {
                required: amount.value(),
                available: self.balance.0,
            })
        }
    }

    /// Credits an approved deposit and books it in the deposit statistics.
    pub fn book_deposit(&mut self, amount: Amount) {
        self.balance += amount.into();
        self.total_deposit += amount.into();
    }

    /// Books a completed purchase in the spend statistics. The balance was
    /// already debited when the order was placed.
    pub fn book_spend(&mut self, amount: Amount, month: &str) {
        self.total_spent += amount.into();
        self.roll_month(month);
        self.monthly_spent += amount.into();
    }

    /// Resets the monthly counters when `month` differs from the stored month.
    pub fn roll_month(&mut self, month: &str) {
        if self.month_key.as_deref() != Some(month) {
            self.monthly_spent = Balance::ZERO;
            self.monthly_earned = Balance::ZERO;
            self.month_key = Some(month.to_string());
        }
    }
}
