use crate::domain::account::Account;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct AccountRow {
    account: String,
    balance: String,
    total_spent: String,
    total_deposit: String,
    monthly_spent: String,
    monthly_earned: String,
}

impl From<&Account> for AccountRow {
    fn from(account: &Account) -> Self {
        Self {
            account: account.id.to_string(),
            balance: account.balance.to_string(),
            total_spent: account.total_spent.to_string(),
            total_deposit: account.total_deposit.to_string(),
            monthly_spent: account.monthly_spent.to_string(),
            monthly_earned: account.monthly_earned.to_string(),
        }
    }
}

/// Writes account snapshots as CSV, one row per account.
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_accounts<'a>(&mut self, accounts: impl IntoIterator<Item = &'a Account>) -> Result<()> {
        for account in accounts {
            self.writer.serialize(AccountRow::from(account))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
