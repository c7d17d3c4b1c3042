//! Shape shared by orders and deposits: a per-owner record with a
//! `Pending -> {Completed, Failed}` status field.
//!
//! `Settling` is the stored marker of a record whose money movement is in
//! flight. Outside the lifecycle engine it reads as `Pending`.

use super::account::AccountId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    Pending,
    /// Claimed by a transition whose balance update has not committed yet.
    Settling,
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Status as seen by listings, counters and change subscribers.
    pub fn visible(self) -> Self {
        match self {
            Self::Settling => Self::Pending,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Settling => "Settling",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key generated by the repository on creation; independent of the
/// human-readable record id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Placeholder carried by records that have not been stored yet.
    pub fn unassigned() -> Self {
        Self(String::new())
    }

    pub fn is_assigned(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// Common accessors the repositories and the lifecycle engine rely on.
pub trait LedgerRecord: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection name, used for logging, errors and storage namespacing.
    const KIND: &'static str;

    fn storage_key(&self) -> &StorageKey;
    fn assign_key(&mut self, key: StorageKey);
    fn owner(&self) -> &AccountId;
    fn status(&self) -> RecordStatus;
    fn set_status(&mut self, status: RecordStatus);
    fn created_at(&self) -> DateTime<Utc>;
}

/// Read-only projection filter for listing records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub owner: Option<AccountId>,
    pub status: Option<RecordStatus>,
    pub created_on: Option<NaiveDate>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn pending() -> Self {
        Self::default().with_status(RecordStatus::Pending)
    }

    pub fn owned_by(mut self, owner: AccountId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn created_on(mut self, day: NaiveDate) -> Self {
        self.created_on = Some(day);
        self
    }

    pub fn matches<R: LedgerRecord>(&self, record: &R) -> bool {
        self.owner.as_ref().is_none_or(|o| o == record.owner())
            && self
                .status
                .is_none_or(|s| s.visible() == record.status().visible())
            && self
                .created_on
                .is_none_or(|d| d == record.created_at().date_naive())
    }
}

/// Per-status counters for operational dashboards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn tally<'a, R: LedgerRecord>(records: impl IntoIterator<Item = &'a R>) -> Self {
        let mut counts = Self::default();
        for record in records {
            match record.status() {
                RecordStatus::Pending | RecordStatus::Settling => counts.pending += 1,
                RecordStatus::Completed => counts.completed += 1,
                RecordStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// Result of a conditional status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped,
    /// The stored status did not match the expected one; carries the actual status.
    Mismatch(RecordStatus),
    Missing,
}

/// Change notification pushed to subscribers of a repository.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordChange {
    pub kind: &'static str,
    pub owner: AccountId,
    pub key: StorageKey,
    pub change: ChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    StatusChanged(RecordStatus),
    Deleted,
}

impl ChangeKind {
    /// The change to publish for a `previous -> next` status write, if
    /// subscribers can observe it.
    pub fn status_change(previous: RecordStatus, next: RecordStatus) -> Option<Self> {
        (previous.visible() != next.visible()).then_some(Self::StatusChanged(next.visible()))
    }
}
