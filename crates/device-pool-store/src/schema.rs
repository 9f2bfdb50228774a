//! Column families of the embedded `RocksDB` backend.
//!
//! The shared-store model has three value kinds; each gets its own column
//! family so a key can be looked up without knowing its kind up front.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Plain string values with optional expiry (locks, heartbeats).
    pub const STRINGS: &str = "strings";

    /// Field maps (device records).
    pub const HASHES: &str = "hashes";

    /// Member sets (indexes, port and server pools).
    pub const SETS: &str = "sets";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::STRINGS, cf::HASHES, cf::SETS]
}
