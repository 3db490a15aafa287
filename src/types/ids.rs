//! Identity types
//!
//! Every identifier in the ledger is derived from content with SHA-256, so the
//! same inputs always yield the same ids across runs and machines.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{sha256_hex, short_hash, to_iso};

/// Identifier of an immutable narrative fragment (`frag_<16 hex>`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(String);

impl FragmentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derive a fragment id and its content hash from the raw capture
    ///
    /// Returns `(frag_<first 16 hex of hash>, full hash)`.
    pub fn generate(source_id: &str, timestamp: &DateTime<Utc>, payload: &str) -> (Self, String) {
        let content_hash = sha256_hex(&format!("{}|{}|{}", source_id, to_iso(timestamp), payload));
        let id = Self(format!("frag_{}", &content_hash[..16]));
        (id, content_hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FragmentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FragmentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a narrative thread (`thread_<16 hex>`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Deterministic thread id from a seed string
    pub fn generate(seed: &str) -> Self {
        Self(format!("thread_{}", short_hash(seed, 16)))
    }

    /// Id of the thread founded by `fragment_id`
    pub fn founded_by(fragment_id: &FragmentId) -> Self {
        Self::generate(&format!("thread_from_{}", fragment_id))
    }

    /// Id of a branch split off `origin`, named after its first fragment
    pub fn branch_of(origin: &ThreadId, first_fragment: &FragmentId) -> Self {
        Self::generate(&format!("branch|{}|{}", origin, first_fragment))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of one recorded thread version (`v_<12 hex>`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Deterministic version id from the entity, the sequence and the parent seed
    pub fn generate(entity: &str, sequence: LogSequence, parent: Option<&str>) -> Self {
        let seed = format!("{}|{}|{}", entity, sequence, parent.unwrap_or("root"));
        Self(format!("v_{}", short_hash(&seed, 12)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 1-based position of an entry in the event log; 0 means "before the first entry"
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LogSequence(u64);

impl LogSequence {
    pub const ZERO: LogSequence = LogSequence(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Zero-based slot of this sequence in an entry vector
    pub(crate) fn index(self) -> Option<usize> {
        self.0.checked_sub(1).map(|i| i as usize)
    }
}

impl fmt::Display for LogSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for LogSequence {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
