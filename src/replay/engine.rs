use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::cache::DerivationCache;
use super::{LateArrivalResult, ReplayConfig, ReplayResult};
use crate::clock::{Clock, LogicalClock};
use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::event_log::{EventLog, LogStore, SharedEventLog};
use crate::state_machine::StateMachine;
use crate::types::{DerivedState, Fragment, LogEntry, LogSequence, SnapshotRecord};
use crate::utils::hours_between;
use crate::versioning::VersionTracker;

/// Single writer over one event log
#[derive(Debug)]
pub struct ReplayEngine {
    log: SharedEventLog,
    clock: LogicalClock,
    state_machine: StateMachine,
    versions: VersionTracker,
    config: ReplayConfig,
    store: Option<LogStore>,
    last_state: Option<DerivedState>,
    cache: DerivationCache,
}

impl ReplayEngine {
    pub fn new(
        log: EventLog,
        clock: LogicalClock,
        state_machine: StateMachine,
        config: ReplayConfig,
    ) -> Self {
        Self {
            log: SharedEventLog::new(log),
            clock,
            state_machine,
            versions: VersionTracker::new(),
            config,
            store: None,
            last_state: None,
            cache: DerivationCache::default(),
        }
    }

    /// In-memory engine over an empty log
    pub fn from_config(config: &EngineConfig, clock: LogicalClock) -> Self {
        Self::new(
            EventLog::new(),
            clock,
            StateMachine::new(config.state_machine.clone()),
            config.replay.clone(),
        )
    }

    /// Engine backed by the store in `config`, hydrated and verified
    ///
    /// Version lineage resumes from the persisted snapshots, so re-derived
    /// versions are not written twice and new ones extend the stored heads.
    pub fn open(config: &EngineConfig, clock: LogicalClock) -> CoreResult<Self> {
        config.validate()?;
        let store = LogStore::open(config.store.clone())?;
        let log = store.hydrate()?;
        let versions = VersionTracker::restore(&store.load_snapshots()?)?;

        let mut engine = Self::new(
            log,
            clock,
            StateMachine::new(config.state_machine.clone()),
            config.replay.clone(),
        )
        .with_store(store);
        engine.versions = versions;
        Ok(engine)
    }

    /// Persist every future append and version to `store`
    pub fn with_store(mut self, store: LogStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Read handle; readers may derive concurrently with this engine
    pub fn log(&self) -> &SharedEventLog {
        &self.log
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.state_machine
    }

    pub fn versions(&self) -> &VersionTracker {
        &self.versions
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&LogStore> {
        self.store.as_ref()
    }

    /// Most recent derivation made by `replay_to` and friends
    pub fn last_state(&self) -> Option<&DerivedState> {
        self.last_state.as_ref()
    }

    /// Append a fragment at the tail of the log
    ///
    /// With a store attached the entry is on disk before the log accepts it;
    /// a failed write leaves the log unchanged.
    pub fn append(&mut self, fragment: Fragment) -> CoreResult<LogEntry> {
        let store = self.store.as_ref();
        self.log.append_with(fragment, &mut self.clock, |entry| match store {
            Some(store) => store.persist_entry(entry),
            None => Ok(()),
        })
    }

    /// Write a live clock's tick log next to the store's files
    ///
    /// A replay clock only hands out ticks it was given, so nothing is
    /// written and the recorded history stays intact.
    pub fn save_clock(&self) -> CoreResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        if !self.clock.is_live() {
            debug!("Replay clock, tick log left untouched");
            return Ok(());
        }
        self.clock.save_log(store.config().clock_ticks_path())
    }

    /// Re-derive up to `sequence`, judged at the clock's current time
    pub fn replay_to(&mut self, sequence: LogSequence) -> CoreResult<ReplayResult> {
        let reference_time = self.clock.now()?;
        self.replay_to_at(sequence, reference_time)
    }

    /// Re-derive up to the current head
    pub fn replay_full(&mut self) -> CoreResult<ReplayResult> {
        let head = self.log.state().head_sequence;
        self.replay_to(head)
    }

    /// Re-derive up to `sequence` at an explicit reference time
    ///
    /// Records one version per thread and diffs against the previous
    /// derivation by per-thread state hash.
    pub fn replay_to_at(
        &mut self,
        sequence: LogSequence,
        reference_time: DateTime<Utc>,
    ) -> CoreResult<ReplayResult> {
        let state = self.state_at(sequence, reference_time)?;

        let previous_hashes: HashMap<_, _> = self
            .last_state
            .iter()
            .flat_map(|s| s.threads.iter())
            .map(|t| (t.thread_id.clone(), t.state_hash.as_str()))
            .collect();
        let previous_markers: HashSet<&str> = self
            .last_state
            .iter()
            .flat_map(|s| s.absences.iter())
            .map(|m| m.marker_id.as_str())
            .collect();

        let mut new_threads = Vec::new();
        let mut modified_threads = Vec::new();
        for thread in &state.threads {
            match previous_hashes.get(&thread.thread_id) {
                None => new_threads.push(thread.thread_id.clone()),
                Some(&hash) if hash != thread.state_hash => {
                    modified_threads.push(thread.thread_id.clone())
                }
                Some(_) => {}
            }
        }
        let new_absences = state
            .absences
            .iter()
            .filter(|m| !previous_markers.contains(m.marker_id.as_str()))
            .cloned()
            .collect();

        let checkpoint = self.versions.checkpoint();
        let mut versions = Vec::new();
        let mut records: Vec<SnapshotRecord> = Vec::new();
        for view in &state.threads {
            let known = self.versions.contains(&view.version_id);
            let version = self.versions.record_version(view, reference_time);
            versions.push(version.version_id.clone());
            if !known {
                records.push(version.to_snapshot_record());
            }
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.append_snapshots(&records) {
                self.versions.rollback(checkpoint);
                return Err(e);
            }
        }

        let result = ReplayResult {
            state,
            new_threads,
            modified_threads,
            new_absences,
            versions,
        };
        info!(
            at_sequence = result.state.at_sequence.value(),
            threads = result.state.threads.len(),
            new_threads = result.new_threads.len(),
            modified_threads = result.modified_threads.len(),
            new_absences = result.new_absences.len(),
            "Replayed log"
        );
        self.last_state = Some(result.state.clone());
        Ok(result)
    }

    /// Point-in-time query, cached per log head
    ///
    /// Records nothing and leaves `last_state` alone.
    pub fn state_at(
        &mut self,
        sequence: LogSequence,
        reference_time: DateTime<Utc>,
    ) -> CoreResult<DerivedState> {
        let log = self.log.read();
        if let Some(cached) = self.cache.get(log.head_hash(), sequence, reference_time) {
            debug!(at_sequence = sequence.value(), "Derivation cache hit");
            return Ok(cached.clone());
        }

        let state = self
            .state_machine
            .derive_state(&log, Some(sequence), reference_time)?;
        self.cache.insert(log.head_hash(), state.clone());
        Ok(state)
    }

    /// Accept a fragment whose event time precedes entries already logged
    ///
    /// Duplicates are rejected before any clock tick. Fragments older than
    /// the rewind horizon are rejected with `TemporalAmbiguity` and the log
    /// is left exactly as it was. Accepted fragments are appended at the
    /// tail and the whole log is re-derived.
    pub fn handle_late_arrival(
        &mut self,
        fragment: Fragment,
        event_timestamp: DateTime<Utc>,
    ) -> CoreResult<LateArrivalResult> {
        if fragment.event_timestamp != event_timestamp {
            return Err(CoreError::TimestampMismatch {
                fragment_id: fragment.fragment_id,
                fragment_timestamp: fragment.event_timestamp,
                supplied: event_timestamp,
            });
        }

        if self.log.read().contains_fragment(&fragment.fragment_id) {
            return Err(CoreError::DuplicateFragment(fragment.fragment_id));
        }

        let reference_time = self.clock.now()?;
        let age = reference_time - event_timestamp;
        if age > self.config.max_rewind() {
            let age_hours = hours_between(&reference_time, &event_timestamp);
            warn!(
                fragment_id = %fragment.fragment_id,
                age_hours,
                horizon_hours = self.config.max_rewind_hours,
                "Rejected late arrival beyond rewind horizon"
            );
            return Err(CoreError::TemporalAmbiguity {
                event_timestamp,
                age_hours,
                horizon_hours: self.config.max_rewind_hours,
            });
        }

        let temporal_position = self.log.read().find_temporal_position(&event_timestamp);
        let entry = self.append(fragment)?;
        info!(
            fragment_id = %entry.fragment_id(),
            sequence = entry.sequence().value(),
            temporal_position = temporal_position.value(),
            "Accepted late arrival"
        );

        let replay = self.replay_to_at(entry.sequence(), reference_time)?;
        Ok(LateArrivalResult {
            entry,
            temporal_position,
            replay,
        })
    }

    /// Derive the full log twice and require identical hashes
    ///
    /// Uses the reference time of the last replay, or the head's ingestion
    /// time when nothing has been replayed yet. Bypasses the cache. Returns
    /// the agreed state hash.
    pub fn verify_determinism(&self) -> CoreResult<String> {
        let log = self.log.read();
        let reference_time = self
            .last_state
            .as_ref()
            .map(|s| s.reference_time)
            .or_else(|| log.entries().last().map(LogEntry::ingestion_timestamp))
            .unwrap_or_default();

        let first = self.state_machine.derive_state(&log, None, reference_time)?;
        let second = self.state_machine.derive_state(&log, None, reference_time)?;
        if first.state_hash != second.state_hash {
            return Err(CoreError::DeterminismViolation {
                first: first.state_hash,
                second: second.state_hash,
            });
        }

        if let Some(last) = &self.last_state {
            if last.at_sequence == first.at_sequence
                && last.reference_time == reference_time
                && last.state_hash != first.state_hash
            {
                return Err(CoreError::DeterminismViolation {
                    first: last.state_hash.clone(),
                    second: first.state_hash,
                });
            }
        }

        info!(
            at_sequence = first.at_sequence.value(),
            state_hash = %first.state_hash,
            "Determinism verified"
        );
        Ok(first.state_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::StateMachineConfig;
    use crate::types::{FragmentId, LifecycleState, RelationType};
    use chrono::{Duration, TimeZone};

    fn t(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn frag(id: &str, hours: i64, topics: &[&str]) -> Fragment {
        Fragment::new(id, format!("hash-{}", id), t(hours), t(hours)).with_topics(topics.iter().copied())
    }

    /// Engine whose clock ticks every hour starting at `start`
    fn engine(start: i64) -> ReplayEngine {
        let ticks = (0..100).map(|i| t(start + i)).collect();
        ReplayEngine::new(
            EventLog::new(),
            LogicalClock::replay(ticks),
            StateMachine::default(),
            ReplayConfig::default(),
        )
    }

    #[test]
    fn test_replay_diffs_against_previous_derivation() {
        let mut engine = engine(0);
        engine.append(frag("f1", 0, &["a"])).unwrap();

        let first = engine.replay_to_at(LogSequence::new(1), t(1)).unwrap();
        assert_eq!(first.new_threads.len(), 1);
        assert!(first.modified_threads.is_empty());
        assert_eq!(first.versions.len(), 1);

        engine.append(frag("f2", 1, &["a"])).unwrap();
        engine.append(frag("f3", 2, &["zzz"])).unwrap();
        let second = engine.replay_to_at(LogSequence::new(3), t(3)).unwrap();
        assert_eq!(second.new_threads.len(), 1);
        assert_eq!(second.modified_threads.len(), 1);
        assert!(second.has_changes());

        let thread = second.state.thread_containing(&"f1".into()).unwrap();
        let lineage = engine.versions().get_lineage(&thread.thread_id).unwrap();
        assert_eq!(lineage.len(), 2);
        assert_eq!(lineage.latest().unwrap().lifecycle_state, LifecycleState::Active);
    }

    #[test]
    fn test_repeated_replay_records_nothing_new() {
        let mut engine = engine(0);
        engine.append(frag("f1", 0, &["a"])).unwrap();
        engine.replay_to_at(LogSequence::new(1), t(1)).unwrap();
        let again = engine.replay_to_at(LogSequence::new(1), t(1)).unwrap();

        assert!(!again.has_changes());
        assert_eq!(engine.versions().len(), 1);
    }

    #[test]
    fn test_state_at_is_cached_until_head_moves() {
        let mut engine = engine(0);
        engine.append(frag("f1", 0, &["a"])).unwrap();
        let before = engine.state_at(LogSequence::new(1), t(5)).unwrap();
        assert_eq!(engine.cache.len(), 1);
        let hit = engine.state_at(LogSequence::new(1), t(5)).unwrap();
        assert_eq!(before, hit);

        engine.append(frag("f2", 1, &["a"])).unwrap();
        let after = engine.state_at(LogSequence::new(1), t(5)).unwrap();
        assert_eq!(before.state_hash, after.state_hash);
        assert_eq!(engine.cache.len(), 1);
        assert!(engine.last_state().is_none());
    }

    #[test]
    fn test_late_arrival_inside_horizon() {
        let mut engine = engine(20);
        engine.append(frag("f1", 0, &["a"])).unwrap();
        engine.append(frag("f3", 10, &["a"])).unwrap();

        let late = frag("f2", 5, &["a"]);
        let result = engine.handle_late_arrival(late, t(5)).unwrap();
        assert_eq!(result.entry.sequence(), LogSequence::new(3));
        assert_eq!(result.temporal_position, LogSequence::ZERO);

        let thread = &result.replay.state.threads[0];
        assert_eq!(
            thread.member_fragment_ids,
            vec![FragmentId::new("f1"), FragmentId::new("f2"), FragmentId::new("f3")]
        );
    }

    #[test]
    fn test_late_arrival_beyond_horizon_leaves_log_untouched() {
        let mut engine = engine(500);
        engine.append(frag("f1", 490, &["a"])).unwrap();
        let before = engine.log().state();

        let err = engine
            .handle_late_arrival(frag("old", 0, &["a"]), t(0))
            .unwrap_err();
        match err {
            CoreError::TemporalAmbiguity { age_hours, horizon_hours, .. } => {
                assert_eq!(age_hours, 501.0);
                assert_eq!(horizon_hours, 168);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(engine.log().state(), before);
    }

    #[test]
    fn test_late_arrival_rejects_mismatched_timestamp() {
        let mut engine = engine(0);
        let err = engine
            .handle_late_arrival(frag("f1", 0, &["a"]), t(1))
            .unwrap_err();
        assert!(matches!(err, CoreError::TimestampMismatch { .. }));
        assert!(engine.log().state().is_empty());
    }

    #[test]
    fn test_old_duplicate_is_a_duplicate_not_ambiguity() {
        let mut engine = engine(500);
        engine.append(frag("f1", 0, &["a"])).unwrap();
        let ticks_left = engine.clock().remaining();

        let err = engine
            .handle_late_arrival(frag("f1", 0, &["a"]), t(0))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateFragment(ref id) if id == &FragmentId::new("f1")));
        assert_eq!(engine.clock().remaining(), ticks_left);
        assert_eq!(engine.log().state().entry_count, 1);
    }

    #[test]
    fn test_verify_determinism_with_divergence_and_gaps() {
        let config = StateMachineConfig {
            dormancy_hours: 24,
            ..StateMachineConfig::default()
        };
        let ticks = (0..20).map(|i| t(2000 + i)).collect();
        let mut engine = ReplayEngine::new(
            EventLog::new(),
            LogicalClock::replay(ticks),
            StateMachine::new(config),
            ReplayConfig::default(),
        );
        engine.append(frag("f1", 0, &["a"])).unwrap();
        engine
            .append(frag("f2", 500, &["b"]).with_relation("f1", RelationType::Continuation))
            .unwrap();
        engine.append(frag("f3", 1000, &["a"])).unwrap();

        assert!(engine.verify_determinism().is_ok());
        let replayed = engine.replay_full().unwrap();
        assert_eq!(engine.verify_determinism().unwrap(), replayed.state.state_hash);
    }
}
