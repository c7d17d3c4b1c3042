use super::account::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Failed,
    Admin,
}

/// Title and body in one locale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub title: String,
    pub body: String,
}

impl Message {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// English and Bengali renditions of the same message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedMessage {
    pub en: Message,
    pub bn: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    User(AccountId),
    Broadcast,
}

impl Target {
    pub fn includes(&self, account: &AccountId) -> bool {
        match self {
            Self::User(id) => id == account,
            Self::Broadcast => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user-visible in-app message.
///
/// System-generated notifications may be deleted; operator-authored ones are
/// kept as audit records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub target: Target,
    pub message: LocalizedMessage,
    pub kind: NotificationKind,
    pub is_system_generated: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn system(
        target: AccountId,
        kind: NotificationKind,
        message: LocalizedMessage,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::generate(),
            target: Target::User(target),
            message,
            kind,
            is_system_generated: true,
            created_at,
        }
    }

    pub fn operator(target: Target, message: LocalizedMessage, created_at: DateTime<Utc>) -> Self {
        Self {
            id: NotificationId::generate(),
            target,
            message,
            kind: NotificationKind::Admin,
            is_system_generated: false,
            created_at,
        }
    }

    pub fn is_deletable(&self) -> bool {
        self.is_system_generated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> LocalizedMessage {
        LocalizedMessage {
            en: Message::new("Hello", "World"),
            bn: Message::new("হ্যালো", "বিশ্ব"),
        }
    }

    #[test]
    fn test_system_notifications_are_deletable() {
        let n = Notification::system("u1".into(), NotificationKind::Success, message(), Utc::now());
        assert!(n.is_deletable());
        assert!(n.target.includes(&"u1".into()));
        assert!(!n.target.includes(&"u2".into()));
    }

    #[test]
    fn test_operator_notifications_are_immutable() {
        let n = Notification::operator(Target::Broadcast, message(), Utc::now());
        assert!(!n.is_deletable());
        assert_eq!(n.kind, NotificationKind::Admin);
        assert!(n.target.includes(&"anyone".into()));
    }
}
