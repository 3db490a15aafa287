//! Utility functions and helpers
//!
//! Timestamp formatting, hashing and crash-safe file writes shared by the
//! log, the clock and the state machine.

pub mod atomic;
pub mod hash;
pub mod time;

pub use atomic::{atomic_write_with, cleanup_temp_files};
pub use hash::{sha256_hex, short_hash};
pub use time::{checked_hours, hours_between, parse_iso, saturating_hours, to_iso, truncate_to_micros};
