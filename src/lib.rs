//! Narrative Ledger
//!
//! A temporal event-sourcing engine for narrative threads. Fragments go into
//! an append-only, hash-chained log; threads, absences and divergences are
//! derived from that log by a deterministic state machine and never stored.
//!
//! # Features
//!
//! - **Hash-chained log**: every entry links to its predecessor, hydration
//!   re-verifies the chain and halts on the first fault
//! - **Deterministic derivation**: same log, sequence and reference time give
//!   the same state hash
//! - **Logical clock**: live ticks are recorded and can be replayed exactly
//! - **Structural divergence**: threads whose relation graph falls apart are
//!   split, never remerged
//! - **Late arrivals**: appended at the tail within a rewind horizon,
//!   rejected beyond it
//! - **Version lineage**: one version per thread per derivation, forming a DAG
//!
//! # Modules
//!
//! - `types`: Fragments, log entries, thread views, versions
//! - `event_log`: In-memory log, shared handle and JSONL store
//! - `clock`: Live and replay clocks
//! - `topology`: Structural graph analysis
//! - `state_machine`: Thread matching, lifecycle and `derive_state`
//! - `versioning`: Version tracker and offline DAG
//! - `replay`: Single-writer engine with late-arrival handling
//! - `config`: Engine configuration and environment overlay
//! - `utils`: Hashing, timestamps, atomic writes
//!
//! # Example
//!
//! ```no_run
//! use narrative_ledger::{EngineConfig, Fragment, LogicalClock, ReplayEngine};
//!
//! fn main() -> narrative_ledger::CoreResult<()> {
//!     let config = EngineConfig::from_env()?;
//!     let mut engine = ReplayEngine::open(&config, LogicalClock::live())?;
//!
//!     let now = chrono::Utc::now();
//!     let fragment = Fragment::new("frag_1", "content-hash", now, now).with_topics(["election"]);
//!     engine.append(fragment)?;
//!
//!     let result = engine.replay_full()?;
//!     println!("{} threads", result.state.threads.len());
//!     engine.save_clock()
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod event_log;
pub mod replay;
pub mod state_machine;
pub mod topology;
pub mod types;
pub mod utils;
pub mod versioning;

// Re-export commonly used items at crate root
pub use clock::{Clock, ClockMode, LogicalClock};
pub use config::EngineConfig;
pub use error::{CoreError, CoreResult};
pub use event_log::{EventLog, LogStore, LogStoreConfig, SharedEventLog};
pub use replay::{LateArrivalResult, ReplayConfig, ReplayEngine, ReplayResult};
pub use state_machine::{StateMachine, StateMachineConfig};
pub use topology::TopologyEngine;
pub use types::{
    AbsenceMarker, DerivedState, Fragment, FragmentId, FragmentRelation, LifecycleState,
    LogEntry, LogSequence, LogState, RelationType, ThreadId, ThreadView, VersionId,
    VersionedThread,
};
pub use versioning::{VersionDag, VersionTracker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
