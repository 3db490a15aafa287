//! In-memory hash-chained event log
//!
//! The log is the only source of truth. It supports exactly two write paths:
//!
//! - `append` for fresh fragments (assigns the next sequence and links to the head)
//! - `load_verified_entry` for hydration (re-checks everything, halts on the first fault)
//!
//! Neither touches any derived thread state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::debug;

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::types::{Fragment, FragmentId, LogEntry, LogSequence, LogState};
use crate::utils::sha256_hex;

/// Append-only, hash-chained sequence of log entries
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Vec<LogEntry>,
    head_hash: String,
    fragment_index: HashMap<FragmentId, LogSequence>,
    /// `(ingestion_timestamp, sequence)` sorted by timestamp, then sequence
    temporal_index: Vec<(DateTime<Utc>, LogSequence)>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current head summary
    pub fn state(&self) -> LogState {
        LogState {
            head_sequence: self.head_sequence(),
            head_hash: self.head_hash.clone(),
            entry_count: self.entries.len(),
        }
    }

    pub fn head_sequence(&self) -> LogSequence {
        self.entries
            .last()
            .map(LogEntry::sequence)
            .unwrap_or(LogSequence::ZERO)
    }

    pub fn head_hash(&self) -> &str {
        &self.head_hash
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a fragment at the tail, stamping it with `clock`
    pub fn append<C: Clock + ?Sized>(
        &mut self,
        fragment: Fragment,
        clock: &mut C,
    ) -> CoreResult<LogEntry> {
        self.append_with(fragment, clock, |_| Ok(()))
    }

    /// Append, handing the new entry to `persist` before the log accepts it
    ///
    /// When `persist` fails the log is left exactly as it was, so memory never
    /// runs ahead of durable storage. The clock tick is still consumed.
    pub fn append_with<C, F>(
        &mut self,
        fragment: Fragment,
        clock: &mut C,
        persist: F,
    ) -> CoreResult<LogEntry>
    where
        C: Clock + ?Sized,
        F: FnOnce(&LogEntry) -> CoreResult<()>,
    {
        if self.fragment_index.contains_key(&fragment.fragment_id) {
            return Err(CoreError::DuplicateFragment(fragment.fragment_id));
        }

        let ingestion_timestamp = clock.now()?;
        let sequence = self.head_sequence().next();
        let entry = LogEntry::create(sequence, fragment, ingestion_timestamp, self.head_hash.clone());
        persist(&entry)?;

        debug!(
            sequence = sequence.value(),
            fragment_id = %entry.fragment_id(),
            "Appended log entry"
        );
        self.accept(entry.clone());
        Ok(entry)
    }

    /// Accept a stored entry after re-verifying its position and hash
    pub fn load_verified_entry(&mut self, entry: LogEntry) -> CoreResult<()> {
        let expected = self.head_sequence().next();
        let sequence = entry.sequence();

        if sequence != expected {
            return Err(CoreError::structural(
                sequence.value(),
                format!("expected sequence {}, found {}", expected, sequence),
            ));
        }
        if entry.previous_hash() != self.head_hash {
            return Err(CoreError::structural(
                sequence.value(),
                format!(
                    "previous hash {:?} does not match head hash {:?}",
                    entry.previous_hash(),
                    self.head_hash
                ),
            ));
        }
        let computed = entry.recompute_hash();
        if computed != entry.entry_hash() {
            return Err(CoreError::CorruptEntry {
                sequence: sequence.value(),
                expected: entry.entry_hash().to_string(),
                computed,
            });
        }
        if self.fragment_index.contains_key(entry.fragment_id()) {
            return Err(CoreError::DuplicateFragment(entry.fragment_id().clone()));
        }

        self.accept(entry);
        Ok(())
    }

    fn accept(&mut self, entry: LogEntry) {
        let sequence = entry.sequence();
        let key = (entry.ingestion_timestamp(), sequence);
        let slot = self.temporal_index.partition_point(|existing| *existing < key);
        self.temporal_index.insert(slot, key);

        self.fragment_index.insert(entry.fragment_id().clone(), sequence);
        self.head_hash = entry.entry_hash().to_string();
        self.entries.push(entry);
    }

    /// Entries in `[from, to]`, both bounds optional and clamped to the log
    ///
    /// The iterator borrows the log read-only and can be cloned to restart.
    pub fn replay(&self, from: Option<LogSequence>, to: Option<LogSequence>) -> Replay<'_> {
        let start = from.unwrap_or(LogSequence::new(1)).max(LogSequence::new(1));
        let end = to.unwrap_or(self.head_sequence()).min(self.head_sequence());

        let slice: &[LogEntry] = match (start.index(), end.index()) {
            (Some(lo), Some(hi)) if lo <= hi => &self.entries[lo..=hi],
            _ => &[],
        };
        Replay {
            inner: slice.iter(),
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn get_entry(&self, sequence: LogSequence) -> Option<&LogEntry> {
        sequence.index().and_then(|i| self.entries.get(i))
    }

    pub fn get_entry_by_fragment(&self, fragment_id: &FragmentId) -> Option<&LogEntry> {
        self.fragment_index
            .get(fragment_id)
            .and_then(|seq| self.get_entry(*seq))
    }

    pub fn contains_fragment(&self, fragment_id: &FragmentId) -> bool {
        self.fragment_index.contains_key(fragment_id)
    }

    /// Walk the whole chain; `Ok(())` only if every link and hash checks out
    pub fn verify_integrity(&self) -> CoreResult<()> {
        verify_chain(&self.entries)
    }

    /// Hash of the chain prefix ending at `at_sequence` (head when `None`)
    pub fn compute_state_hash(&self, at_sequence: Option<LogSequence>) -> CoreResult<String> {
        let head = self.head_sequence();
        let target = at_sequence.unwrap_or(head);
        if target > head {
            return Err(CoreError::SequenceOutOfRange {
                requested: target,
                head,
            });
        }
        let entry_hash = self
            .get_entry(target)
            .map(LogEntry::entry_hash)
            .unwrap_or("");
        Ok(sha256_hex(&format!("{}|{}", target, entry_hash)))
    }

    /// Last sequence whose ingestion time precedes `timestamp`, or 0
    ///
    /// This is where a late fragment with that timestamp would have landed had
    /// it arrived on time.
    pub fn find_temporal_position(&self, timestamp: &DateTime<Utc>) -> LogSequence {
        let idx = self.temporal_index.partition_point(|(ts, _)| ts < timestamp);
        idx.checked_sub(1)
            .map(|i| self.temporal_index[i].1)
            .unwrap_or(LogSequence::ZERO)
    }
}

/// Read-only iterator over a range of log entries
#[derive(Debug, Clone)]
pub struct Replay<'a> {
    inner: std::slice::Iter<'a, LogEntry>,
}

impl<'a> Iterator for Replay<'a> {
    type Item = &'a LogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Replay<'_> {}

/// Verify a chain of entries from the genesis link
///
/// Hashes are recomputed in parallel; the walk itself is sequential so the
/// first broken sequence is the one reported.
pub fn verify_chain(entries: &[LogEntry]) -> CoreResult<()> {
    let computed: Vec<String> = entries.par_iter().map(LogEntry::recompute_hash).collect();

    let mut previous_hash = "";
    for (position, (entry, computed)) in entries.iter().zip(&computed).enumerate() {
        let expected_sequence = LogSequence::new(position as u64 + 1);
        let sequence = entry.sequence();
        if sequence != expected_sequence {
            return Err(CoreError::structural(
                expected_sequence.value(),
                format!("expected sequence {}, found {}", expected_sequence, sequence),
            ));
        }
        if entry.previous_hash() != previous_hash {
            return Err(CoreError::structural(
                sequence.value(),
                "previous hash does not match predecessor entry hash",
            ));
        }
        if computed != entry.entry_hash() {
            return Err(CoreError::CorruptEntry {
                sequence: sequence.value(),
                expected: entry.entry_hash().to_string(),
                computed: computed.clone(),
            });
        }
        previous_hash = entry.entry_hash();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::LogicalClock;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn fragment(id: &str) -> Fragment {
        Fragment::new(id, format!("hash_{}", id), t0(), t0())
    }

    /// Clock ticking once per hour from t0
    fn hourly_clock(n: i64) -> LogicalClock {
        LogicalClock::replay((0..n).map(|i| t0() + Duration::hours(i)).collect())
    }

    fn create_test_log(ids: &[&str]) -> EventLog {
        let mut clock = hourly_clock(ids.len() as i64);
        let mut log = EventLog::new();
        for id in ids {
            log.append(fragment(id), &mut clock).unwrap();
        }
        log
    }

    #[test]
    fn test_append_chains_to_head() {
        let log = create_test_log(&["a", "b", "c"]);
        let entries = log.entries();

        assert_eq!(entries[0].sequence(), LogSequence::new(1));
        assert_eq!(entries[0].previous_hash(), "");
        assert_eq!(entries[1].previous_hash(), entries[0].entry_hash());
        assert_eq!(entries[2].previous_hash(), entries[1].entry_hash());

        let state = log.state();
        assert_eq!(state.head_sequence, LogSequence::new(3));
        assert_eq!(state.head_hash, entries[2].entry_hash());
        assert_eq!(state.entry_count, 3);
        assert!(log.verify_integrity().is_ok());
    }

    #[test]
    fn test_duplicate_fragment_rejected_without_tick() {
        let mut clock = hourly_clock(1);
        let mut log = EventLog::new();
        log.append(fragment("a"), &mut clock).unwrap();

        let err = log.append(fragment("a"), &mut clock).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_FRAGMENT");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_failed_persist_leaves_log_untouched() {
        let mut clock = hourly_clock(3);
        let mut log = EventLog::new();
        log.append(fragment("a"), &mut clock).unwrap();
        let before = log.state();

        let err = log
            .append_with(fragment("b"), &mut clock, |_| {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
            })
            .unwrap_err();
        assert_eq!(err.code(), "IO");
        assert_eq!(log.state(), before);
        assert!(!log.contains_fragment(&FragmentId::new("b")));

        // The fragment can be retried and lands at the next free sequence
        let entry = log.append(fragment("b"), &mut clock).unwrap();
        assert_eq!(entry.sequence(), LogSequence::new(2));
        assert_eq!(entry.previous_hash(), before.head_hash);
    }

    #[test]
    fn test_append_propagates_clock_exhaustion() {
        let mut clock = hourly_clock(0);
        let mut log = EventLog::new();
        let err = log.append(fragment("a"), &mut clock).unwrap_err();
        assert_eq!(err.code(), "CLOCK_EXHAUSTED");
        assert!(log.is_empty());
        assert_eq!(log.state(), LogState::default());
    }

    #[test]
    fn test_replay_ranges() {
        let log = create_test_log(&["a", "b", "c", "d"]);

        let all: Vec<_> = log.replay(None, None).map(|e| e.fragment_id().to_string()).collect();
        assert_eq!(all, vec!["a", "b", "c", "d"]);

        let mid = log.replay(Some(LogSequence::new(2)), Some(LogSequence::new(3)));
        assert_eq!(mid.len(), 2);

        let restart = mid.clone();
        assert_eq!(mid.count(), restart.count());

        assert_eq!(log.replay(Some(LogSequence::new(3)), Some(LogSequence::new(2))).count(), 0);
        assert_eq!(log.replay(None, Some(LogSequence::new(99))).count(), 4);
        assert_eq!(log.replay(None, Some(LogSequence::ZERO)).count(), 0);
        assert_eq!(EventLog::new().replay(None, None).count(), 0);
    }

    #[test]
    fn test_lookups() {
        let log = create_test_log(&["a", "b"]);
        assert_eq!(log.get_entry(LogSequence::new(2)).unwrap().fragment_id().as_str(), "b");
        assert!(log.get_entry(LogSequence::ZERO).is_none());
        assert!(log.get_entry(LogSequence::new(3)).is_none());
        assert_eq!(
            log.get_entry_by_fragment(&FragmentId::new("a")).unwrap().sequence(),
            LogSequence::new(1)
        );
        assert!(log.get_entry_by_fragment(&FragmentId::new("zz")).is_none());
    }

    #[test]
    fn test_load_verified_entry_rebuilds_identical_log() {
        let original = create_test_log(&["a", "b", "c"]);
        let mut rebuilt = EventLog::new();
        for entry in original.entries() {
            rebuilt.load_verified_entry(entry.clone()).unwrap();
        }
        assert_eq!(rebuilt.state(), original.state());
    }

    #[test]
    fn test_load_verified_entry_rejects_gap() {
        let original = create_test_log(&["a", "b"]);
        let mut rebuilt = EventLog::new();
        let err = rebuilt
            .load_verified_entry(original.entries()[1].clone())
            .unwrap_err();
        assert_eq!(err.code(), "STRUCTURAL_INCONSISTENCY");
        assert!(rebuilt.is_empty());
    }

    #[test]
    fn test_load_verified_entry_rejects_bad_hash() {
        let original = create_test_log(&["a"]);
        let good = &original.entries()[0];
        let forged = LogEntry::from_parts(
            good.sequence(),
            good.fragment().clone(),
            good.ingestion_timestamp() + Duration::seconds(1),
            good.previous_hash(),
            good.entry_hash(),
        );

        let mut rebuilt = EventLog::new();
        match rebuilt.load_verified_entry(forged) {
            Err(CoreError::CorruptEntry { sequence, .. }) => assert_eq!(sequence, 1),
            other => panic!("expected CorruptEntry, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_chain_reports_first_broken_link() {
        let log = create_test_log(&["a", "b", "c"]);
        let mut entries = log.entries().to_vec();
        let second = &entries[1];
        // Relinked to a bogus predecessor with a hash that is itself consistent
        let relinked = LogEntry::create(
            second.sequence(),
            second.fragment().clone(),
            second.ingestion_timestamp(),
            "f00d".to_string(),
        );
        entries[1] = relinked;

        match verify_chain(&entries) {
            Err(CoreError::StructuralInconsistency { sequence, .. }) => assert_eq!(sequence, 2),
            other => panic!("expected StructuralInconsistency, got {:?}", other),
        }
    }

    #[test]
    fn test_compute_state_hash() {
        let log = create_test_log(&["a", "b"]);
        let at_one = log.compute_state_hash(Some(LogSequence::new(1))).unwrap();
        let at_head = log.compute_state_hash(None).unwrap();
        assert_ne!(at_one, at_head);
        assert_eq!(at_head, log.compute_state_hash(Some(LogSequence::new(2))).unwrap());
        assert_eq!(
            log.compute_state_hash(Some(LogSequence::ZERO)).unwrap(),
            sha256_hex("0|")
        );
        assert_eq!(
            log.compute_state_hash(Some(LogSequence::new(3))).unwrap_err().code(),
            "SEQUENCE_OUT_OF_RANGE"
        );
    }

    #[test]
    fn test_find_temporal_position() {
        // Ingested at t0, t0+1h, t0+2h
        let log = create_test_log(&["a", "b", "c"]);

        assert_eq!(log.find_temporal_position(&(t0() - Duration::hours(1))), LogSequence::ZERO);
        assert_eq!(log.find_temporal_position(&t0()), LogSequence::ZERO);
        assert_eq!(
            log.find_temporal_position(&(t0() + Duration::minutes(90))),
            LogSequence::new(2)
        );
        assert_eq!(
            log.find_temporal_position(&(t0() + Duration::hours(10))),
            LogSequence::new(3)
        );
    }
}
