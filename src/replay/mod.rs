//! Replay engine
//!
//! The single writer of the ledger. It owns the clock, appends fragments,
//! re-derives state on demand, records versions and diffs each derivation
//! against the previous one.
//!
//! # Late arrivals
//!
//! ```text
//! fragment ──► age = now - event_timestamp
//!                 │
//!                 ├── age > max_rewind ──► TemporalAmbiguity (log untouched)
//!                 │
//!                 └── append at tail ──► full re-derivation
//! ```

mod cache;
mod engine;

pub use engine::ReplayEngine;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{AbsenceMarker, DerivedState, LogEntry, LogSequence, ThreadId, VersionId};
use crate::utils::{checked_hours, saturating_hours};

/// Rewind horizon for late arrivals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub max_rewind_hours: i64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_rewind_hours: 168,
        }
    }
}

impl ReplayConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_rewind_hours < 0 {
            return Err(CoreError::InvalidConfig(format!(
                "max_rewind_hours must not be negative, got {}",
                self.max_rewind_hours
            )));
        }
        if checked_hours(self.max_rewind_hours).is_none() {
            return Err(CoreError::InvalidConfig(format!(
                "max_rewind_hours = {} is beyond the representable duration range",
                self.max_rewind_hours
            )));
        }
        Ok(())
    }

    /// Clamped to chrono's range when unvalidated
    pub fn max_rewind(&self) -> Duration {
        saturating_hours(self.max_rewind_hours)
    }
}

/// Outcome of one re-derivation, diffed against the previous one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayResult {
    pub state: DerivedState,
    /// Threads absent from the previous derivation
    pub new_threads: Vec<ThreadId>,
    /// Threads whose state hash changed
    pub modified_threads: Vec<ThreadId>,
    /// Absence markers not present in the previous derivation
    pub new_absences: Vec<AbsenceMarker>,
    /// Version of every thread in `state`, in thread order
    pub versions: Vec<VersionId>,
}

impl ReplayResult {
    pub fn has_changes(&self) -> bool {
        !self.new_threads.is_empty()
            || !self.modified_threads.is_empty()
            || !self.new_absences.is_empty()
    }
}

/// Outcome of an accepted late arrival
#[derive(Debug, Clone)]
pub struct LateArrivalResult {
    /// Entry appended at the tail
    pub entry: LogEntry,
    /// Last sequence ingested before the fragment's event time
    pub temporal_position: LogSequence,
    pub replay: ReplayResult,
}
