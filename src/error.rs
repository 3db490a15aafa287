//! Error types for ledger operations
//!
//! Every failure inside the core is an explicit, typed value. Nothing is
//! retried, skipped or replaced with a guessed default.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::types::{FragmentId, LogSequence};

/// Result type for ledger operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the event log, state machine and replay engine
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Hash-chain or sequence violation during hydration or an integrity check
    #[error("structural inconsistency at sequence {sequence}: {reason}")]
    StructuralInconsistency { sequence: u64, reason: String },

    /// Recomputed entry hash does not match the stored value
    #[error("corrupt entry at sequence {sequence}: stored hash {expected}, computed {computed}")]
    CorruptEntry {
        sequence: u64,
        expected: String,
        computed: String,
    },

    /// Late arrival older than the rewind horizon
    #[error(
        "temporal ambiguity: event at {event_timestamp} is {age_hours:.1}h old, rewind horizon is {horizon_hours}h"
    )]
    TemporalAmbiguity {
        event_timestamp: DateTime<Utc>,
        age_hours: f64,
        horizon_hours: i64,
    },

    /// Replay clock ran out of recorded ticks
    #[error("replay clock exhausted at tick {index}, only {recorded} ticks were recorded")]
    ClockExhausted { index: usize, recorded: usize },

    /// A fragment references a fragment that is not in the log
    #[error("fragment {fragment_id} references unknown fragment {target}")]
    DanglingRelation {
        fragment_id: FragmentId,
        target: FragmentId,
    },

    /// The fragment is already present in the log
    #[error("fragment {0} is already in the log")]
    DuplicateFragment(FragmentId),

    /// Requested sequence lies beyond the head of the log
    #[error("sequence {requested} is beyond the log head {head}")]
    SequenceOutOfRange {
        requested: LogSequence,
        head: LogSequence,
    },

    /// Late-arrival timestamp disagrees with the fragment's own event time
    #[error("fragment {fragment_id} has event time {fragment_timestamp}, caller supplied {supplied}")]
    TimestampMismatch {
        fragment_id: FragmentId,
        fragment_timestamp: DateTime<Utc>,
        supplied: DateTime<Utc>,
    },

    /// Two derivations over the same log disagreed
    #[error("non-deterministic derivation: {first} != {second}")]
    DeterminismViolation { first: String, second: String },

    /// Configuration values are incoherent
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A persisted JSONL line could not be parsed
    #[error("malformed record in {} at line {line}: {source}", path.display())]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Stable error code for calling layers to surface verbatim
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::StructuralInconsistency { .. } => "STRUCTURAL_INCONSISTENCY",
            CoreError::CorruptEntry { .. } => "CORRUPT_ENTRY",
            CoreError::TemporalAmbiguity { .. } => "TEMPORAL_AMBIGUITY",
            CoreError::ClockExhausted { .. } => "CLOCK_EXHAUSTED",
            CoreError::DanglingRelation { .. } => "DANGLING_RELATION",
            CoreError::DuplicateFragment(_) => "DUPLICATE_FRAGMENT",
            CoreError::SequenceOutOfRange { .. } => "SEQUENCE_OUT_OF_RANGE",
            CoreError::TimestampMismatch { .. } => "TIMESTAMP_MISMATCH",
            CoreError::DeterminismViolation { .. } => "DETERMINISM_VIOLATION",
            CoreError::InvalidConfig(_) => "INVALID_CONFIG",
            CoreError::MalformedRecord { .. } => "MALFORMED_RECORD",
            CoreError::Io(_) => "IO",
            CoreError::Json(_) => "JSON",
        }
    }

    /// Shorthand for a structural inconsistency at `sequence`
    pub(crate) fn structural(sequence: u64, reason: impl Into<String>) -> Self {
        CoreError::StructuralInconsistency {
            sequence,
            reason: reason.into(),
        }
    }
}
