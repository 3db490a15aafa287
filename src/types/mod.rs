//! Data types for the narrative ledger
//!
//! Value types shared by the log, the state machine and the version tracker.
//! Fragments and log entries are immutable inputs; thread views, absence
//! markers and versions are derived outputs.

mod fragment;
mod ids;
mod log_entry;
mod thread;
mod version;

pub use fragment::{Fragment, FragmentRelation, RelationType, SourceMetadata, SourceTier};
pub use ids::{FragmentId, LogSequence, ThreadId, VersionId};
pub use log_entry::{compute_entry_hash, LogEntry, LogEntryRecord, LogState};
pub use thread::{AbsenceMarker, DerivedState, DivergenceRecord, LifecycleState, ThreadView};
pub use version::{SnapshotRecord, ThreadLineage, VersionedThread};
