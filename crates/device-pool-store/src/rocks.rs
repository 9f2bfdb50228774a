//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait
//! for a single process. Values are CBOR-encoded; TTL keys carry their
//! expiry and are treated as absent once it passes. Compound operations
//! (read-modify-write of sets and hashes, set-if-absent) run under one
//! process-wide write lock and land in a single `WriteBatch`, which gives
//! them the same atomicity the networked store provides.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options,
    WriteBatch,
};
use serde::{Deserialize, Serialize};

use crate::batch::{Batch, Op};
use crate::error::{Result, StoreError};
use crate::schema::{all_column_families, cf};
use crate::Store;

/// A string value with optional expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StringEntry {
    value: String,
    expires_at_ms: Option<i64>,
}

impl StringEntry {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map_or(true, |at| at > now_ms)
    }
}

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn expiry_ms(ttl: Duration) -> i64 {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self::now_ms().saturating_add(ttl_ms)
    }

    fn read_string(&self, key: &str) -> Result<Option<StringEntry>> {
        let cf = self.cf(cf::STRINGS)?;
        let entry = self
            .db
            .get_cf(&cf, key)?
            .map(|data| Self::deserialize::<StringEntry>(&data))
            .transpose()?;
        let now = Self::now_ms();
        Ok(entry.filter(|e| e.is_live(now)))
    }

    fn read_hash(&self, key: &str) -> Result<HashMap<String, String>> {
        let cf = self.cf(cf::HASHES)?;
        Ok(self
            .db
            .get_cf(&cf, key)?
            .map(|data| Self::deserialize(&data))
            .transpose()?
            .unwrap_or_default())
    }

    fn read_set(&self, key: &str) -> Result<BTreeSet<String>> {
        let cf = self.cf(cf::SETS)?;
        Ok(self
            .db
            .get_cf(&cf, key)?
            .map(|data| Self::deserialize(&data))
            .transpose()?
            .unwrap_or_default())
    }

    fn write_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let cf = self.cf(cf::STRINGS)?;
        let entry = StringEntry {
            value: value.to_string(),
            expires_at_ms: Some(Self::expiry_ms(ttl)),
        };
        self.db.put_cf(&cf, key, Self::serialize(&entry)?)?;
        Ok(())
    }

    /// Stage a set write; empty sets are deleted, matching Redis semantics.
    fn stage_set(
        &self,
        wb: &mut WriteBatch,
        key: &str,
        members: &BTreeSet<String>,
    ) -> Result<()> {
        let cf = self.cf(cf::SETS)?;
        if members.is_empty() {
            wb.delete_cf(&cf, key);
        } else {
            wb.put_cf(&cf, key, Self::serialize(members)?);
        }
        Ok(())
    }
}

/// Working copy of the keys a batch touches.
#[derive(Default)]
struct Staging {
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
    deleted: BTreeSet<String>,
}

#[async_trait]
impl Store for RocksStore {
    async fn ping(&self) -> Result<()> {
        for name in all_column_families() {
            self.cf(name)?;
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.read_hash(key)
    }

    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>> {
        self.read_set(key)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if self.read_string(key)?.is_some() {
            return Ok(true);
        }
        let cf_hashes = self.cf(cf::HASHES)?;
        let cf_sets = self.cf(cf::SETS)?;
        Ok(self.db.get_pinned_cf(&cf_hashes, key)?.is_some()
            || self.db.get_pinned_cf(&cf_sets, key)?.is_some())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let _guard = self.write_lock.lock();
        if self.read_string(key)?.is_some() {
            return Ok(false);
        }
        self.write_string(key, value, ttl)?;
        Ok(true)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.write_string(key, value, ttl)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut batch = Batch::new();
        batch.delete(key);
        self.execute(batch).await
    }

    async fn pop_into(&self, from: &str, to: &str) -> Result<Option<String>> {
        let _guard = self.write_lock.lock();

        let mut source = self.read_set(from)?;
        let Some(member) = source.pop_first() else {
            return Ok(None);
        };
        let mut target = self.read_set(to)?;
        target.insert(member.clone());

        let mut wb = WriteBatch::default();
        self.stage_set(&mut wb, from, &source)?;
        self.stage_set(&mut wb, to, &target)?;
        self.db.write(wb)?;

        Ok(Some(member))
    }

    async fn execute(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock();
        let mut staging = Staging::default();

        for op in batch.into_ops() {
            match op {
                Op::HashSet { key, fields } => {
                    if !staging.hashes.contains_key(&key) {
                        let current = if staging.deleted.contains(&key) {
                            HashMap::new()
                        } else {
                            self.read_hash(&key)?
                        };
                        staging.hashes.insert(key.clone(), current);
                    }
                    if let Some(hash) = staging.hashes.get_mut(&key) {
                        hash.extend(fields);
                    }
                }
                Op::SetAdd { key, member } => {
                    let set = staged_set(self, &mut staging, &key)?;
                    set.insert(member);
                }
                Op::SetRemove { key, member } => {
                    let set = staged_set(self, &mut staging, &key)?;
                    set.remove(&member);
                }
                Op::Delete { key } => {
                    staging.hashes.remove(&key);
                    staging.sets.remove(&key);
                    staging.deleted.insert(key);
                }
            }
        }

        let cf_strings = self.cf(cf::STRINGS)?;
        let cf_hashes = self.cf(cf::HASHES)?;
        let cf_sets = self.cf(cf::SETS)?;

        let mut wb = WriteBatch::default();
        for key in &staging.deleted {
            wb.delete_cf(&cf_strings, key);
            wb.delete_cf(&cf_hashes, key);
            wb.delete_cf(&cf_sets, key);
        }
        for (key, hash) in &staging.hashes {
            wb.put_cf(&cf_hashes, key, Self::serialize(hash)?);
        }
        for (key, members) in &staging.sets {
            self.stage_set(&mut wb, key, members)?;
        }

        self.db.write(wb)?;
        Ok(())
    }
}

/// Fetch (loading on first use) the staged copy of a set.
fn staged_set<'a>(
    store: &RocksStore,
    staging: &'a mut Staging,
    key: &str,
) -> Result<&'a mut BTreeSet<String>> {
    if !staging.sets.contains_key(key) {
        let current = if staging.deleted.contains(key) {
            BTreeSet::new()
        } else {
            store.read_set(key)?
        };
        staging.sets.insert(key.to_string(), current);
    }
    staging
        .sets
        .get_mut(key)
        .ok_or_else(|| StoreError::Database(format!("staged set vanished: {key}")))
}
