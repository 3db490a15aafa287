//! Event log module
//!
//! This module provides the durable source of truth:
//! - `EventLog`: in-memory hash-chained append-only log
//! - `SharedEventLog`: single-writer / many-reader handle
//! - `LogStore`: forensic JSONL persistence and verified hydration
//! - `StatsCollector`: store statistics
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//! ┌──────────┐    ┌───────────────┐    ┌───────────────────┐
//! │ Fragment │───►│ EventLog      │───►│ LogStore          │
//! │          │    │ append + hash │    │ fragments.jsonl   │
//! └──────────┘    └───────────────┘    │ log_entries.jsonl │
//!                                      └───────────────────┘
//!
//! Read Path (Startup):
//! ┌───────────────────┐    ┌─────────────────────┐
//! │ log_entries.jsonl │───►│ load_verified_entry │───► EventLog
//! │ + fragments.jsonl │    │ halt on first fault │
//! └───────────────────┘    └─────────────────────┘
//! ```

mod log;
mod shared;
mod stats;
mod store;

pub use log::{verify_chain, EventLog, Replay};
pub use shared::SharedEventLog;
pub use stats::{HydrationBenchmark, LogStoreStats, StatsCollector};
pub use store::{LogStore, LogStoreConfig};
