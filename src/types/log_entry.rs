//! Log entry types
//!
//! Each entry wraps one fragment and links to its predecessor:
//!
//! ```text
//! entry_hash = sha256("{sequence}|{fragment_id}|{ingestion_ts}|{previous_hash}")
//! ```
//!
//! The first entry links to the empty string. Entries are only built by the
//! log itself or rebuilt from disk, so their fields are read-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Fragment, FragmentId, LogSequence};
use crate::error::{CoreError, CoreResult};
use crate::utils::{parse_iso, sha256_hex, to_iso};

/// Hash of one chain link
pub fn compute_entry_hash(
    sequence: LogSequence,
    fragment_id: &FragmentId,
    ingestion_timestamp: &DateTime<Utc>,
    previous_hash: &str,
) -> String {
    sha256_hex(&format!(
        "{}|{}|{}|{}",
        sequence,
        fragment_id,
        to_iso(ingestion_timestamp),
        previous_hash
    ))
}

/// Immutable, hash-linked record of one fragment in the log
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    sequence: LogSequence,
    fragment: Fragment,
    ingestion_timestamp: DateTime<Utc>,
    previous_hash: String,
    entry_hash: String,
}

impl LogEntry {
    /// Create a fresh entry, computing its hash
    pub(crate) fn create(
        sequence: LogSequence,
        fragment: Fragment,
        ingestion_timestamp: DateTime<Utc>,
        previous_hash: String,
    ) -> Self {
        let entry_hash = compute_entry_hash(
            sequence,
            &fragment.fragment_id,
            &ingestion_timestamp,
            &previous_hash,
        );
        Self {
            sequence,
            fragment,
            ingestion_timestamp,
            previous_hash,
            entry_hash,
        }
    }

    /// Reassemble an entry exactly as stored, without checking it
    ///
    /// Such an entry only becomes part of a log through
    /// `EventLog::load_verified_entry`.
    pub fn from_parts(
        sequence: LogSequence,
        fragment: Fragment,
        ingestion_timestamp: DateTime<Utc>,
        previous_hash: impl Into<String>,
        entry_hash: impl Into<String>,
    ) -> Self {
        Self {
            sequence,
            fragment,
            ingestion_timestamp,
            previous_hash: previous_hash.into(),
            entry_hash: entry_hash.into(),
        }
    }

    pub fn sequence(&self) -> LogSequence {
        self.sequence
    }

    pub fn fragment(&self) -> &Fragment {
        &self.fragment
    }

    pub fn fragment_id(&self) -> &FragmentId {
        &self.fragment.fragment_id
    }

    pub fn ingestion_timestamp(&self) -> DateTime<Utc> {
        self.ingestion_timestamp
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn entry_hash(&self) -> &str {
        &self.entry_hash
    }

    /// Hash this entry should carry given its other fields
    pub fn recompute_hash(&self) -> String {
        compute_entry_hash(
            self.sequence,
            &self.fragment.fragment_id,
            &self.ingestion_timestamp,
            &self.previous_hash,
        )
    }

    /// Forensic JSONL form (fragment stored separately)
    pub fn to_record(&self) -> LogEntryRecord {
        LogEntryRecord {
            sequence: self.sequence,
            fragment_id: self.fragment.fragment_id.clone(),
            ingestion_timestamp: to_iso(&self.ingestion_timestamp),
            previous_hash: self.previous_hash.clone(),
            entry_hash: self.entry_hash.clone(),
        }
    }
}

/// One line of `log_entries.jsonl`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntryRecord {
    pub sequence: LogSequence,
    pub fragment_id: FragmentId,
    pub ingestion_timestamp: String,
    pub previous_hash: String,
    pub entry_hash: String,
}

impl LogEntryRecord {
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn parsed_ingestion_timestamp(&self) -> CoreResult<DateTime<Utc>> {
        parse_iso(&self.ingestion_timestamp).map_err(|e| {
            CoreError::structural(
                self.sequence.value(),
                format!("unreadable ingestion timestamp {:?}: {}", self.ingestion_timestamp, e),
            )
        })
    }

    /// Hash recomputed from the record alone
    pub fn recompute_hash(&self) -> CoreResult<String> {
        let ingestion_timestamp = self.parsed_ingestion_timestamp()?;
        Ok(compute_entry_hash(
            self.sequence,
            &self.fragment_id,
            &ingestion_timestamp,
            &self.previous_hash,
        ))
    }

    /// Join the record with its fragment
    pub fn into_entry(self, fragment: Fragment) -> CoreResult<LogEntry> {
        if fragment.fragment_id != self.fragment_id {
            return Err(CoreError::structural(
                self.sequence.value(),
                format!(
                    "record names fragment {} but {} was supplied",
                    self.fragment_id, fragment.fragment_id
                ),
            ));
        }
        let ingestion_timestamp = self.parsed_ingestion_timestamp()?;
        Ok(LogEntry::from_parts(
            self.sequence,
            fragment,
            ingestion_timestamp,
            self.previous_hash,
            self.entry_hash,
        ))
    }
}

/// Head of the log at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogState {
    pub head_sequence: LogSequence,
    /// Empty string for an empty log
    pub head_hash: String,
    pub entry_count: usize,
}

impl LogState {
    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }
}
