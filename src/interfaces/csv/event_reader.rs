use crate::application::lifecycle::Adjustment;
use crate::domain::account::{AccountId, Amount};
use crate::domain::identifier::{Category, Destination};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Open,
    SetPin,
    Purchase,
    Deposit,
    ApproveOrder,
    RejectOrder,
    ApproveDeposit,
    RejectDeposit,
    Adjust,
    Sweep,
    Settings,
}

/// One CSV row as written in the file.
///
/// `ref` is a caller-chosen alias for the order or deposit so later rows can
/// refer to it. The meaning of `detail` depends on the event type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    pub event: EventType,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default, rename = "ref")]
    pub alias: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub pin: Option<String>,
}

/// An event together with the time it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub at: DateTime<Utc>,
    pub event: Event,
}

/// A runtime setting change. Unset fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsChange {
    pub auto_refund_enabled: Option<bool>,
    pub auto_refund_timeout_minutes: Option<u32>,
    pub auto_notifications_enabled: Option<bool>,
}

/// A validated replay event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Open {
        account: AccountId,
    },
    /// `None` clears the PIN.
    SetPin {
        account: AccountId,
        pin: Option<String>,
    },
    Purchase {
        account: AccountId,
        alias: String,
        category: Category,
        price: Amount,
        destination: Destination,
        pin: Option<String>,
    },
    Deposit {
        account: AccountId,
        alias: String,
        amount: Decimal,
        method: String,
        reference: String,
    },
    ApproveOrder {
        alias: String,
    },
    RejectOrder {
        alias: String,
        reason: Option<String>,
    },
    ApproveDeposit {
        alias: String,
    },
    RejectDeposit {
        alias: String,
        reason: Option<String>,
    },
    Adjust {
        account: AccountId,
        direction: Adjustment,
        amount: Amount,
    },
    Sweep,
    Settings(SettingsChange),
}

impl EventRecord {
    pub fn into_event(self) -> Result<Event> {
        let event = match self.event {
            EventType::Open => Event::Open {
                account: required_account(&self.account)?,
            },
            EventType::SetPin => Event::SetPin {
                account: required_account(&self.account)?,
                pin: self.detail.or(self.pin),
            },
            EventType::Purchase => {
                let detail = required(&self.detail, "detail")?;
                let (category, raw) = detail.split_once(':').unwrap_or(("uid", detail));
                let category = Category::parse(category)?;
                Event::Purchase {
                    account: required_account(&self.account)?,
                    alias: required(&self.alias, "ref")?.to_string(),
                    category,
                    price: Amount::new(required_amount(self.amount)?)?,
                    destination: parse_destination(category, raw)?,
                    pin: self.pin,
                }
            }
            EventType::Deposit => {
                let detail = required(&self.detail, "detail")?;
                let (method, reference) = detail.split_once(':').ok_or_else(|| {
                    LedgerError::Validation("deposit detail must be <method>:<reference>".to_string())
                })?;
                Event::Deposit {
                    account: required_account(&self.account)?,
                    alias: required(&self.alias, "ref")?.to_string(),
                    amount: required_amount(self.amount)?,
                    method: method.to_string(),
                    reference: reference.to_string(),
                }
            }
            EventType::ApproveOrder => Event::ApproveOrder {
                alias: required(&self.alias, "ref")?.to_string(),
            },
            EventType::RejectOrder => Event::RejectOrder {
                alias: required(&self.alias, "ref")?.to_string(),
                reason: self.detail,
            },
            EventType::ApproveDeposit => Event::ApproveDeposit {
                alias: required(&self.alias, "ref")?.to_string(),
            },
            EventType::RejectDeposit => Event::RejectDeposit {
                alias: required(&self.alias, "ref")?.to_string(),
                reason: self.detail,
            },
            EventType::Adjust => {
                let direction = match required(&self.detail, "detail")?.to_ascii_lowercase().as_str() {
                    "add" => Adjustment::Add,
                    "deduct" => Adjustment::Deduct,
                    other => {
                        return Err(LedgerError::Validation(format!(
                            "adjust direction must be add or deduct, got {other}"
                        )));
                    }
                };
                Event::Adjust {
                    account: required_account(&self.account)?,
                    direction,
                    amount: Amount::new(required_amount(self.amount)?)?,
                }
            }
            EventType::Sweep => Event::Sweep,
            EventType::Settings => Event::Settings(parse_settings(required(&self.detail, "detail")?)?),
        };
        Ok(event)
    }
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str> {
    field
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| LedgerError::Validation(format!("missing {name}")))
}

fn required_account(field: &Option<String>) -> Result<AccountId> {
    required(field, "account").map(AccountId::from)
}

fn required_amount(amount: Option<Decimal>) -> Result<Decimal> {
    amount.ok_or_else(|| LedgerError::Validation("missing amount".to_string()))
}

/// Splits the raw destination text according to the category:
/// `mlbb` and `email` take `a|b`, `imo` takes `<country>|<number>` or an IMO ID.
fn parse_destination(category: Category, raw: &str) -> Result<Destination> {
    let pair = raw.split_once('|').map(|(a, b)| (a.trim().to_string(), b.trim().to_string()));
    let destination = match (category, pair) {
        (Category::Mlbb, Some((player, zone))) => Destination::PlayerWithZone { player, zone },
        (Category::Email, Some((email, phone))) => Destination::EmailWithPhone { email, phone },
        (Category::Imo, Some((country, number))) => Destination::ImoNumber { country, number },
        (Category::Imo, None) => Destination::ImoId(raw.trim().to_string()),
        (Category::Uid | Category::Pubg, None) => Destination::Player(raw.trim().to_string()),
        (category, _) => {
            return Err(LedgerError::Validation(format!(
                "malformed destination for {category:?}: {raw}"
            )));
        }
    };
    Ok(destination)
}

/// Parses `key=value` pairs separated by `;`.
fn parse_settings(detail: &str) -> Result<SettingsChange> {
    let mut change = SettingsChange::default();
    for pair in detail.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| LedgerError::Validation(format!("malformed setting: {pair}")))?;
        let invalid = || LedgerError::Validation(format!("invalid value for {key}: {value}"));
        match key.trim() {
            "auto_refund" => change.auto_refund_enabled = Some(value.trim().parse().map_err(|_| invalid())?),
            "timeout" => {
                change.auto_refund_timeout_minutes = Some(value.trim().parse().map_err(|_| invalid())?)
            }
            "notifications" => {
                change.auto_notifications_enabled = Some(value.trim().parse().map_err(|_| invalid())?)
            }
            other => {
                return Err(LedgerError::Validation(format!("unknown setting: {other}")));
            }
        }
    }
    Ok(change)
}

/// Reads replay events from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths.
pub struct EventReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> EventReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and validates events, one `Result` per row.
    pub fn events(self) -> impl Iterator<Item = Result<TimedEvent>> {
        self.reader
            .into_deserialize::<EventRecord>()
            .map(|row| -> Result<TimedEvent> {
                let record = row?;
                let at = record.at;
                Ok(TimedEvent {
                    at,
                    event: record.into_event()?,
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const HEADER: &str = "at,event,account,ref,amount,detail,pin\n";

    fn read(rows: &str) -> Vec<Result<Event>> {
        let data = format!("{HEADER}{rows}");
        EventReader::new(data.as_bytes())
            .events()
            .map(|row| row.map(|timed| timed.event))
            .collect()
    }

    #[test]
    fn test_reads_purchase_with_composite_destination() {
        let events = read("2026-10-01T09:00:00Z, purchase, u1, o1, 60, mlbb:12345678|1234, 0420\n");
        let event = events[0].as_ref().unwrap();
        assert_eq!(
            *event,
            Event::Purchase {
                account: "u1".into(),
                alias: "o1".to_string(),
                category: Category::Mlbb,
                price: Amount::new(dec!(60)).unwrap(),
                destination: Destination::PlayerWithZone {
                    player: "12345678".to_string(),
                    zone: "1234".to_string(),
                },
                pin: Some("0420".to_string()),
            }
        );
    }

    #[test]
    fn test_reads_short_rows() {
        let events = read("2026-10-01T09:00:00Z, sweep\n2026-10-01T09:00:00Z, open, u1\n");
        assert_eq!(events[0].as_ref().unwrap(), &Event::Sweep);
        assert_eq!(events[1].as_ref().unwrap(), &Event::Open { account: "u1".into() });
    }

    #[test]
    fn test_reads_settings_and_adjustments() {
        let events = read(
            "2026-10-01T09:00:00Z, settings,,,, auto_refund=false;timeout=5\n\
             2026-10-01T09:00:00Z, adjust, u1,, 25, Deduct\n",
        );
        assert_eq!(
            events[0].as_ref().unwrap(),
            &Event::Settings(SettingsChange {
                auto_refund_enabled: Some(false),
                auto_refund_timeout_minutes: Some(5),
                auto_notifications_enabled: None,
            })
        );
        assert!(matches!(
            events[1].as_ref().unwrap(),
            Event::Adjust { direction: Adjustment::Deduct, .. }
        ));
    }

    #[test]
    fn test_malformed_rows_are_errors() {
        let events = read(
            "2026-10-01T09:00:00Z, refund, u1\n\
             2026-10-01T09:00:00Z, purchase, u1,, 60, uid:12345678\n\
             2026-10-01T09:00:00Z, deposit, u1, d1, 500, AB12CD34\n\
             2026-10-01T09:00:00Z, settings,,,, colour=blue\n",
        );
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(Result::is_err));
    }
}
