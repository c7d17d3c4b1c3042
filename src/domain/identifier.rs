//! Destination-account formatting rules per offer category.
//!
//! These are purely formatting gates applied before any balance effect.

use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Generic numeric player UID.
    Uid,
    Pubg,
    Mlbb,
    Email,
    Imo,
}

impl Category {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "uid" => Ok(Self::Uid),
            "pubg" => Ok(Self::Pubg),
            "mlbb" => Ok(Self::Mlbb),
            "email" => Ok(Self::Email),
            "imo" => Ok(Self::Imo),
            other => Err(LedgerError::Validation(format!(
                "Unknown offer category: {other}"
            ))),
        }
    }
}

/// Calling-code and national-number length range for IMO phone numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImoCountry {
    pub short: &'static str,
    pub code: &'static str,
    pub min: usize,
    pub max: usize,
}

pub const IMO_COUNTRIES: &[ImoCountry] = &[
    ImoCountry { short: "BD", code: "+880", min: 10, max: 11 },
    ImoCountry { short: "SA", code: "+966", min: 9, max: 10 },
    ImoCountry { short: "AE", code: "+971", min: 9, max: 9 },
    ImoCountry { short: "MY", code: "+60", min: 9, max: 10 },
    ImoCountry { short: "QA", code: "+974", min: 8, max: 8 },
    ImoCountry { short: "OM", code: "+968", min: 8, max: 8 },
    ImoCountry { short: "KW", code: "+965", min: 8, max: 8 },
    ImoCountry { short: "BH", code: "+973", min: 8, max: 8 },
    ImoCountry { short: "IN", code: "+91", min: 10, max: 10 },
    ImoCountry { short: "PK", code: "+92", min: 10, max: 10 },
    ImoCountry { short: "SG", code: "+65", min: 8, max: 8 },
    ImoCountry { short: "MV", code: "+960", min: 7, max: 7 },
    ImoCountry { short: "JO", code: "+962", min: 9, max: 9 },
    ImoCountry { short: "EG", code: "+20", min: 10, max: 10 },
    ImoCountry { short: "LB", code: "+961", min: 8, max: 8 },
    ImoCountry { short: "TR", code: "+90", min: 10, max: 10 },
    ImoCountry { short: "IQ", code: "+964", min: 10, max: 10 },
    ImoCountry { short: "LY", code: "+218", min: 9, max: 9 },
    ImoCountry { short: "IT", code: "+39", min: 10, max: 10 },
    ImoCountry { short: "GB", code: "+44", min: 10, max: 10 },
    ImoCountry { short: "US", code: "+1", min: 10, max: 10 },
    ImoCountry { short: "CA", code: "+1", min: 10, max: 10 },
    ImoCountry { short: "FR", code: "+33", min: 9, max: 9 },
    ImoCountry { short: "DE", code: "+49", min: 10, max: 11 },
    ImoCountry { short: "ES", code: "+34", min: 9, max: 9 },
    ImoCountry { short: "ZA", code: "+27", min: 9, max: 9 },
    ImoCountry { short: "NG", code: "+234", min: 10, max: 10 },
    ImoCountry { short: "MA", code: "+212", min: 9, max: 9 },
    ImoCountry { short: "DZ", code: "+213", min: 9, max: 9 },
    ImoCountry { short: "SD", code: "+249", min: 9, max: 9 },
    ImoCountry { short: "YE", code: "+967", min: 9, max: 9 },
    ImoCountry { short: "ID", code: "+62", min: 10, max: 12 },
    ImoCountry { short: "PH", code: "+63", min: 10, max: 10 },
    ImoCountry { short: "LK", code: "+94", min: 9, max: 9 },
    ImoCountry { short: "NP", code: "+977", min: 10, max: 10 },
    ImoCountry { short: "AF", code: "+93", min: 9, max: 9 },
    ImoCountry { short: "IR", code: "+98", min: 10, max: 10 },
    ImoCountry { short: "RU", code: "+7", min: 10, max: 10 },
    ImoCountry { short: "JP", code: "+81", min: 10, max: 10 },
    ImoCountry { short: "AU", code: "+61", min: 9, max: 9 },
];

impl ImoCountry {
    pub fn lookup(short: &str) -> Option<&'static ImoCountry> {
        IMO_COUNTRIES
            .iter()
            .find(|c| c.short.eq_ignore_ascii_case(short.trim()))
    }
}

/// Raw destination as typed by the buyer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Player(String),
    PlayerWithZone { player: String, zone: String },
    EmailWithPhone { email: String, phone: String },
    ImoNumber { country: String, number: String },
    ImoId(String),
}

impl Destination {
    /// Validates the destination against the category rules and returns the
    /// identifier string stored on the order.
    pub fn validate(&self, category: Category) -> Result<String> {
        match (category, self) {
            (Category::Uid, Self::Player(uid)) => {
                digits_in_range(uid, 8, 15, "UID")?;
                Ok(uid.clone())
            }
            (Category::Pubg, Self::Player(uid)) => {
                digits_in_range(uid, 8, 12, "PUBG ID")?;
                Ok(uid.clone())
            }
            (Category::Mlbb, Self::PlayerWithZone { player, zone }) => {
                digits_in_range(player, 8, 10, "MLBB player ID")?;
                digits_in_range(zone, 4, 5, "MLBB zone ID")?;
                Ok(format!("Player ID: {player} | Zone ID: {zone}"))
            }
            (Category::Email, Self::EmailWithPhone { email, phone }) => {
                let email = email.trim().to_ascii_lowercase();
                if !is_supported_email(&email) {
                    return Err(invalid("Invalid email"));
                }
                if !is_bd_mobile(phone) {
                    return Err(invalid("Invalid phone number"));
                }
                Ok(format!("{email} | {phone}"))
            }
            (Category::Imo, Self::ImoNumber { country, number }) => {
                let country = ImoCountry::lookup(country)
                    .ok_or_else(|| invalid("Unsupported IMO country"))?;
                digits_in_range(number, country.min, country.max, "IMO number")?;
                Ok(format!("IMO Number: {} {number}", country.code))
            }
            (Category::Imo, Self::ImoId(id)) => {
                if id.trim().chars().count() < 4 {
                    return Err(invalid("IMO ID too short"));
                }
                Ok(format!("IMO ID: {}", id.trim()))
            }
            (category, _) => Err(LedgerError::Validation(format!(
                "Destination does not match the {category:?} category"
            ))),
        }
    }
}

fn invalid(message: &str) -> LedgerError {
    LedgerError::Validation(message.to_string())
}

fn digits_in_range(value: &str, min: usize, max: usize, label: &str) -> Result<()> {
    if value.is_empty() {
        return Err(LedgerError::Validation(format!("{label} is required")));
    }
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LedgerError::Validation(format!("{label} must be digits only")));
    }
    if !(min..=max).contains(&value.len()) {
        return Err(LedgerError::Validation(format!(
            "{label} must be {min}-{max} digits"
        )));
    }
    Ok(())
}

fn is_supported_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c))
        && matches!(domain, "gmail.com" | "yahoo.com")
}

/// Bangladeshi mobile number: `01[3-9]` followed by eight digits.
fn is_bd_mobile(phone: &str) -> bool {
    let bytes = phone.as_bytes();
    bytes.len() == 11
        && bytes.iter().all(u8::is_ascii_digit)
        && bytes[0] == b'0'
        && bytes[1] == b'1'
        && (b'3'..=b'9').contains(&bytes[2])
}
