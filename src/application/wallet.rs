//! Account-level operations that do not go through the lifecycle engine.

use crate::domain::account::{Account, AccountId, Pin};
use crate::domain::deposit::{Deposit, normalize_reference};
use crate::domain::order::Order;
use crate::domain::ports::{AccountStore, ClockRef, RecordRepository, Stores};
use crate::domain::record::RecordFilter;
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use tracing::info;

#[derive(Clone)]
pub struct WalletService {
    stores: Stores,
    clock: ClockRef,
}

impl WalletService {
    pub fn new(stores: Stores, clock: ClockRef) -> Self {
        Self { stores, clock }
    }

    /// Creates an empty account. Returns `false` if it already exists.
    pub async fn open_account(&self, id: &AccountId) -> Result<bool> {
        let created = self.stores.accounts.create(Account::new(id.clone())).await?;
        if created {
            info!(account = %id, "account opened");
        }
        Ok(created)
    }

    pub async fn account(&self, id: &AccountId) -> Result<Account> {
        self.stores
            .accounts
            .get(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", id.as_str()))
    }

    /// Files a pending deposit request for manual verification.
    ///
    /// The provider transaction id must not have been used by any stored deposit.
    pub async fn submit_deposit(
        &self,
        owner: &AccountId,
        amount: Decimal,
        method: &str,
        reference: &str,
    ) -> Result<Deposit> {
        self.account(owner).await?;
        let deposit = Deposit::new(owner.clone(), amount, method, reference, self.clock.now())?;

        let reused = self
            .stores
            .deposits
            .list(&RecordFilter::all())
            .await?
            .iter()
            .any(|d| d.external_reference == deposit.external_reference);
        if reused {
            return Err(LedgerError::Validation(
                "Transaction ID already used".to_string(),
            ));
        }

        let deposit = self.stores.deposits.create(deposit).await?;
        info!(
            account = %owner,
            key = %deposit.storage_key,
            reference = %deposit.external_reference,
            amount = %deposit.amount,
            "deposit submitted"
        );
        Ok(deposit)
    }

    /// True if `reference` normalizes to a transaction id already on file.
    pub async fn is_reference_used(&self, reference: &str) -> Result<bool> {
        let reference = normalize_reference(reference)?;
        Ok(self
            .stores
            .deposits
            .list(&RecordFilter::all())
            .await?
            .iter()
            .any(|d| d.external_reference == reference))
    }

    pub async fn set_pin(&self, owner: &AccountId, pin: &str) -> Result<()> {
        let pin = Pin::new(pin)?;
        self.stores
            .accounts
            .mutate(owner, &|current: &Account| {
                let mut next = current.clone();
                next.pin = Some(pin.clone());
                Ok(next)
            })
            .await?;
        info!(account = %owner, "PIN set");
        Ok(())
    }

    /// Operator reset.
    pub async fn clear_pin(&self, owner: &AccountId) -> Result<()> {
        self.stores
            .accounts
            .mutate(owner, &|current: &Account| {
                let mut next = current.clone();
                next.pin = None;
                Ok(next)
            })
            .await?;
        info!(account = %owner, "PIN cleared");
        Ok(())
    }

    pub async fn orders(&self, owner: &AccountId) -> Result<Vec<Order>> {
        self.stores
            .orders
            .list(&RecordFilter::all().owned_by(owner.clone()))
            .await
    }

    pub async fn deposits(&self, owner: &AccountId) -> Result<Vec<Deposit>> {
        self.stores
            .deposits
            .list(&RecordFilter::all().owned_by(owner.clone()))
            .await
    }
}
