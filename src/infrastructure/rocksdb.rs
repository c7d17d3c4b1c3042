use crate::domain::account::{Account, AccountId};
use crate::domain::deposit::Deposit;
use crate::domain::notification::{Notification, NotificationId};
use crate::domain::order::Order;
use crate::domain::ports::{
    AccountStore, DEFAULT_MAX_CAS_ATTEMPTS, NotificationStore, RecordRepository, Stores,
};
use crate::domain::record::{
    ChangeKind, LedgerRecord, RecordChange, RecordFilter, RecordStatus, StorageKey, SwapOutcome,
};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

/// Column Family for account snapshots, keyed by account id.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for orders, keyed by `owner \0 storage key`.
pub const CF_ORDERS: &str = "orders";
/// Column Family for deposits, keyed by `owner \0 storage key`.
pub const CF_DEPOSITS: &str = "deposits";
/// Column Family for notifications, keyed by notification id.
pub const CF_NOTIFICATIONS: &str = "notifications";
/// Column Family marking deleted records, keyed by `record cf \0 owner \0 storage key`.
pub const CF_TOMBSTONES: &str = "tombstones";

const KEY_SEPARATOR: u8 = 0;
const CHANGE_FEED_CAPACITY: usize = 256;

/// A persistent store implementation using RocksDB.
///
/// Every entity lives in its own Column Family and is encoded as JSON.
/// Read-check-write sequences (account compare-and-swap, conditional status
/// updates) run under a single commit lock, so they are atomic with respect
/// to each other within the process.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    commit: Arc<Mutex<()>>,
    max_attempts: u32,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating the
    /// column families that do not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_ACCOUNTS, CF_ORDERS, CF_DEPOSITS, CF_NOTIFICATIONS, CF_TOMBSTONES]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            commit: Arc::new(Mutex::new(())),
            max_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
        })
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            LedgerError::Io(std::io::Error::other(format!(
                "{name} column family not found"
            )))
        })
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_pinned_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(self.cf(cf)?, key, bytes)?;
        Ok(())
    }

    fn remove(&self, cf: &str, key: &[u8]) -> Result<()> {
        self.db.delete_cf(self.cf(cf)?, key)?;
        Ok(())
    }

    /// Decodes every value whose key starts with `prefix`.
    fn scan<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let iter = self
            .db
            .iterator_cf(self.cf(cf)?, IteratorMode::From(prefix, Direction::Forward));
        let mut values = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }
}

fn record_key(owner: &AccountId, key: &StorageKey) -> Vec<u8> {
    let mut bytes = owner_prefix(owner);
    bytes.extend_from_slice(key.as_str().as_bytes());
    bytes
}

fn tombstone_key(cf: &str, owner: &AccountId, key: &StorageKey) -> Vec<u8> {
    let mut bytes = cf.as_bytes().to_vec();
    bytes.push(KEY_SEPARATOR);
    bytes.extend(record_key(owner, key));
    bytes
}

fn owner_prefix(owner: &AccountId) -> Vec<u8> {
    let mut bytes = owner.as_str().as_bytes().to_vec();
    bytes.push(KEY_SEPARATOR);
    bytes
}

#[async_trait]
impl AccountStore for RocksDBStore {
    async fn create(&self, account: Account) -> Result<bool> {
        let _guard = self.commit.lock().await;
        let key = account.id.as_str().as_bytes();
        if self.read::<Account>(CF_ACCOUNTS, key)?.is_some() {
            return Ok(false);
        }
        self.write(CF_ACCOUNTS, key, &account)?;
        Ok(true)
    }

    async fn get(&self, id: &AccountId) -> Result<Option<Account>> {
        self.read(CF_ACCOUNTS, id.as_str().as_bytes())
    }

    async fn get_all(&self) -> Result<Vec<Account>> {
        self.scan(CF_ACCOUNTS, &[])
    }

    async fn compare_and_swap(&self, expected_version: u64, next: Account) -> Result<bool> {
        let _guard = self.commit.lock().await;
        let key = next.id.as_str().as_bytes();
        match self.read::<Account>(CF_ACCOUNTS, key)? {
            Some(stored) if stored.version == expected_version => {
                self.write(CF_ACCOUNTS, key, &next)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Orders or deposits persisted in their own Column Family.
pub struct RocksDBRecordRepository<R> {
    store: RocksDBStore,
    cf: &'static str,
    changes: broadcast::Sender<RecordChange>,
    _record: PhantomData<fn() -> R>,
}

impl<R: LedgerRecord> RocksDBRecordRepository<R> {
    pub fn new(store: RocksDBStore, cf: &'static str) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            store,
            cf,
            changes,
            _record: PhantomData,
        }
    }

    fn publish(&self, owner: &AccountId, key: &StorageKey, change: ChangeKind) {
        let _ = self.changes.send(RecordChange {
            kind: R::KIND,
            owner: owner.clone(),
            key: key.clone(),
            change,
        });
    }
}

#[async_trait]
impl<R: LedgerRecord> RecordRepository<R> for RocksDBRecordRepository<R> {
    async fn create(&self, mut record: R) -> Result<R> {
        let key = StorageKey::generate();
        record.assign_key(key.clone());
        record.set_status(RecordStatus::Pending);
        let owner = record.owner().clone();

        self.store.write(self.cf, &record_key(&owner, &key), &record)?;
        self.publish(&owner, &key, ChangeKind::Created);
        Ok(record)
    }

    async fn get(&self, owner: &AccountId, key: &StorageKey) -> Result<Option<R>> {
        self.store.read(self.cf, &record_key(owner, key))
    }

    async fn update_status(&self, owner: &AccountId, key: &StorageKey, status: RecordStatus) -> Result<()> {
        let previous = {
            let _guard = self.store.commit.lock().await;
            let db_key = record_key(owner, key);
            match self.store.read::<R>(self.cf, &db_key)? {
                Some(mut record) => {
                    let previous = record.status();
                    record.set_status(status);
                    self.store.write(self.cf, &db_key, &record)?;
                    Some(previous)
                }
                None => None,
            }
        };
        if let Some(change) = previous.and_then(|p| ChangeKind::status_change(p, status)) {
            self.publish(owner, key, change);
        }
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        owner: &AccountId,
        key: &StorageKey,
        expected: RecordStatus,
        next: RecordStatus,
    ) -> Result<SwapOutcome> {
        let outcome = {
            let _guard = self.store.commit.lock().await;
            let db_key = record_key(owner, key);
            match self.store.read::<R>(self.cf, &db_key)? {
                Some(mut record) if record.status() == expected => {
                    record.set_status(next);
                    self.store.write(self.cf, &db_key, &record)?;
                    SwapOutcome::Swapped
                }
                Some(record) => SwapOutcome::Mismatch(record.status()),
                None => SwapOutcome::Missing,
            }
        };
        if outcome == SwapOutcome::Swapped {
            if let Some(change) = ChangeKind::status_change(expected, next) {
                self.publish(owner, key, change);
            }
        }
        Ok(outcome)
    }

    async fn delete(&self, owner: &AccountId, key: &StorageKey) -> Result<bool> {
        let removed = {
            let _guard = self.store.commit.lock().await;
            let db_key = record_key(owner, key);
            let exists = self.store.read::<R>(self.cf, &db_key)?.is_some();
            if exists {
                // Tombstone first: a reader that misses the record must find it.
                self.store
                    .write(CF_TOMBSTONES, &tombstone_key(self.cf, owner, key), &true)?;
                self.store.remove(self.cf, &db_key)?;
            }
            exists
        };
        if removed {
            self.publish(owner, key, ChangeKind::Deleted);
        }
        Ok(removed)
    }

    async fn was_deleted(&self, owner: &AccountId, key: &StorageKey) -> Result<bool> {
        let marker: Option<bool> = self
            .store
            .read(CF_TOMBSTONES, &tombstone_key(self.cf, owner, key))?;
        Ok(marker.is_some())
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<R>> {
        let prefix = filter.owner.as_ref().map(owner_prefix).unwrap_or_default();
        let mut matching: Vec<R> = self
            .store
            .scan::<R>(self.cf, &prefix)?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        matching.sort_by_key(|r| r.created_at());
        Ok(matching)
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.changes.subscribe()
    }
}

#[async_trait]
impl NotificationStore for RocksDBStore {
    async fn push(&self, notification: Notification) -> Result<()> {
        self.write(
            CF_NOTIFICATIONS,
            notification.id.to_string().as_bytes(),
            &notification,
        )
    }

    async fn get(&self, id: &NotificationId) -> Result<Option<Notification>> {
        self.read(CF_NOTIFICATIONS, id.to_string().as_bytes())
    }

    async fn list_for(&self, account: &AccountId) -> Result<Vec<Notification>> {
        let mut all = NotificationStore::list_all(self).await?;
        all.retain(|n| n.target.includes(account));
        Ok(all)
    }

    async fn list_all(&self) -> Result<Vec<Notification>> {
        let mut all: Vec<Notification> = self.scan(CF_NOTIFICATIONS, &[])?;
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn delete(&self, id: &NotificationId) -> Result<bool> {
        let key = id.to_string();
        let exists = self
            .read::<Notification>(CF_NOTIFICATIONS, key.as_bytes())?
            .is_some();
        if exists {
            self.remove(CF_NOTIFICATIONS, key.as_bytes())?;
        }
        Ok(exists)
    }
}

impl Stores {
    /// Wires every port to one RocksDB instance at `path`.
    pub fn rocksdb<P: AsRef<Path>>(path: P, max_attempts: u32) -> Result<Self> {
        let store = RocksDBStore::open(path)?.with_max_attempts(max_attempts);
        Ok(Self {
            accounts: Arc::new(store.clone()),
            orders: Arc::new(RocksDBRecordRepository::<Order>::new(store.clone(), CF_ORDERS)),
            deposits: Arc::new(RocksDBRecordRepository::<Deposit>::new(
                store.clone(),
                CF_DEPOSITS,
            )),
            notifications: Arc::new(store),
        })
    }
}
