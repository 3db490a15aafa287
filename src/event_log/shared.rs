//! Shared handle to the event log
//!
//! Appends take the write lock, so they are serialized and the sequence and
//! hash chain stay monotonic. A derivation holds one read guard for its whole
//! walk and therefore sees a stable `LogState`.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};

use super::EventLog;
use crate::clock::Clock;
use crate::error::CoreResult;
use crate::types::{Fragment, LogEntry, LogState};

/// Cloneable, thread-safe handle to one `EventLog`
#[derive(Debug, Clone, Default)]
pub struct SharedEventLog {
    inner: Arc<RwLock<EventLog>>,
}

impl SharedEventLog {
    pub fn new(log: EventLog) -> Self {
        Self {
            inner: Arc::new(RwLock::new(log)),
        }
    }

    /// Read guard over a consistent prefix of the log
    pub fn read(&self) -> RwLockReadGuard<'_, EventLog> {
        self.inner.read()
    }

    pub fn state(&self) -> LogState {
        self.inner.read().state()
    }

    /// Serialized append
    pub fn append<C: Clock + ?Sized>(&self, fragment: Fragment, clock: &mut C) -> CoreResult<LogEntry> {
        self.inner.write().append(fragment, clock)
    }

    /// Serialized append that persists under the same write lock
    pub fn append_with<C, F>(&self, fragment: Fragment, clock: &mut C, persist: F) -> CoreResult<LogEntry>
    where
        C: Clock + ?Sized,
        F: FnOnce(&LogEntry) -> CoreResult<()>,
    {
        self.inner.write().append_with(fragment, clock, persist)
    }
}

impl From<EventLog> for SharedEventLog {
    fn from(log: EventLog) -> Self {
        Self::new(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::LogicalClock;
    use chrono::{Duration, TimeZone, Utc};
    use std::thread;

    #[test]
    fn test_readers_see_consistent_prefixes() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let shared = SharedEventLog::default();
        let mut clock = LogicalClock::replay((0..50).map(|i| t0 + Duration::seconds(i)).collect());

        thread::scope(|scope| {
            for _ in 0..4 {
                let reader = shared.clone();
                scope.spawn(move || {
                    for _ in 0..20 {
                        let guard = reader.read();
                        let state = guard.state();
                        assert_eq!(state.entry_count as u64, state.head_sequence.value());
                        assert!(guard.verify_integrity().is_ok());
                    }
                });
            }

            for i in 0..50 {
                let fragment = crate::types::Fragment::new(format!("frag_{}", i), "h", t0, t0);
                shared.append(fragment, &mut clock).unwrap();
            }
        });

        assert_eq!(shared.state().entry_count, 50);
    }
}
