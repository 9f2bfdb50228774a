//! Shared-state storage layer for the device pool.
//!
//! The device pool has no in-process coordinator: every caller talks to the
//! same key/value store, and correctness rests on the store's atomic
//! primitives. This crate defines those primitives as the [`Store`] trait
//! and provides two backends:
//!
//! - [`RedisStore`]: the networked store shared by any number of processes
//! - [`RocksStore`]: an embedded `RocksDB` store for single-host deployments
//!   and tests
//!
//! See [`keys`] for the persisted key layout.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use device_pool_store::{Batch, RedisStore, Store};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisStore::connect("redis://localhost:6379/0").await?;
//!
//! // Single-shot mutual exclusion
//! if store.set_if_absent("lock:device:d1", "1", Duration::from_secs(60)).await? {
//!     let mut batch = Batch::new();
//!     batch.set_remove("idx:status:available", "d1").set_add("idx:status:in_use", "d1");
//!     store.execute(batch).await?;
//!     store.delete("lock:device:d1").await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod batch;
pub mod error;
pub mod keys;
pub mod redis_store;
pub mod rocks;
pub mod schema;
pub mod types;

pub use batch::{Batch, Op};
pub use error::{Result, StoreError};
pub use redis_store::RedisStore;
pub use rocks::RocksStore;
pub use types::{Device, DeviceStatus, Platform};

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;

/// The primitives of the shared key/value store.
///
/// Each method is a single round trip and is atomic on its own. Compound
/// transitions are expressed as a [`Batch`] passed to [`Store::execute`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Check that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if it is not.
    async fn ping(&self) -> Result<()>;

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read every field of a hash. A missing key yields an empty map.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Read the members of a set. A missing key yields an empty set.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>>;

    /// Check whether a key exists (and, for TTL keys, has not expired).
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    async fn exists(&self, key: &str) -> Result<bool>;

    // =========================================================================
    // TTL keys
    // =========================================================================

    /// Set a string key only if it does not exist, expiring after `ttl`.
    ///
    /// Returns `true` if this call created the key. Of any number of
    /// concurrent callers, at most one observes `true`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Set a string key unconditionally, expiring after `ttl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete a key of any kind. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    async fn delete(&self, key: &str) -> Result<()>;

    // =========================================================================
    // Compound operations
    // =========================================================================

    /// Atomically remove an arbitrary member of `from` and add it to `to`.
    ///
    /// Returns the moved member, or `None` if `from` was empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    async fn pop_into(&self, from: &str, to: &str) -> Result<Option<String>>;

    /// Apply every operation of the batch atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails; in that case none of
    /// the operations are applied.
    async fn execute(&self, batch: Batch) -> Result<()>;
}
