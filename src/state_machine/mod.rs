//! Deterministic state machine
//!
//! `derive_state` is a pure function of `(log, until_sequence, reference_time)`.
//! It walks the log in sequence order, routes every fragment through the
//! thread matcher, records absences, splits threads whose structural graph
//! falls apart, and finally freezes every thread into a `ThreadView`.
//!
//! Nothing here is stored between calls. Threads exist only as views.

mod builder;
mod derivation;
mod lifecycle;
mod matcher;

pub use lifecycle::{classify, LifecycleInput};
pub use matcher::{MatchReason, ThreadMatch, ThreadMatcher};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::event_log::EventLog;
use crate::types::{DerivedState, LogSequence};
use crate::utils::{checked_hours, saturating_hours};
use derivation::Derivation;

/// Thresholds for matching and lifecycle classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachineConfig {
    /// Minimum share of a fragment's topics already in the thread
    pub topic_overlap_min: f64,
    pub temporal_adjacency_hours: i64,
    pub min_active_fragments: usize,
    pub dormancy_hours: i64,
    pub termination_hours: i64,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            topic_overlap_min: 0.6,
            temporal_adjacency_hours: 840,
            min_active_fragments: 2,
            dormancy_hours: 168,
            termination_hours: 840,
        }
    }
}

impl StateMachineConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if !(self.topic_overlap_min > 0.0 && self.topic_overlap_min <= 1.0) {
            return Err(CoreError::InvalidConfig(format!(
                "topic_overlap_min must be in (0, 1], got {}",
                self.topic_overlap_min
            )));
        }
        if self.temporal_adjacency_hours < 0 || self.dormancy_hours < 0 {
            return Err(CoreError::InvalidConfig(
                "hour thresholds must not be negative".to_string(),
            ));
        }
        for (name, hours) in [
            ("temporal_adjacency_hours", self.temporal_adjacency_hours),
            ("dormancy_hours", self.dormancy_hours),
            ("termination_hours", self.termination_hours),
        ] {
            if checked_hours(hours).is_none() {
                return Err(CoreError::InvalidConfig(format!(
                    "{} = {} is beyond the representable duration range",
                    name, hours
                )));
            }
        }
        if self.dormancy_hours >= self.termination_hours {
            return Err(CoreError::InvalidConfig(format!(
                "dormancy_hours ({}) must be below termination_hours ({})",
                self.dormancy_hours, self.termination_hours
            )));
        }
        Ok(())
    }

    /// Clamped to chrono's range when unvalidated
    pub fn dormancy(&self) -> Duration {
        saturating_hours(self.dormancy_hours)
    }

    pub fn termination(&self) -> Duration {
        saturating_hours(self.termination_hours)
    }

    pub fn adjacency_window(&self) -> Duration {
        saturating_hours(self.temporal_adjacency_hours)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    config: StateMachineConfig,
}

impl StateMachine {
    pub fn new(config: StateMachineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StateMachineConfig {
        &self.config
    }

    /// Derive every thread from entries `1..=until` (the whole log when `None`)
    ///
    /// Lifecycle is judged against `reference_time`; no wall clock is read.
    pub fn derive_state(
        &self,
        log: &EventLog,
        until: Option<LogSequence>,
        reference_time: DateTime<Utc>,
    ) -> CoreResult<DerivedState> {
        let head = log.head_sequence();
        let at_sequence = until.unwrap_or(head);
        if at_sequence > head {
            return Err(CoreError::SequenceOutOfRange {
                requested: at_sequence,
                head,
            });
        }

        let mut derivation = Derivation::new(&self.config, log);
        for entry in log.replay(None, Some(at_sequence)) {
            derivation.process(entry)?;
        }
        let state = derivation.finish(at_sequence, reference_time);

        debug!(
            at_sequence = at_sequence.value(),
            threads = state.threads.len(),
            absences = state.absences.len(),
            divergences = state.divergences.len(),
            state_hash = %state.state_hash,
            "Derived state"
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::LogicalClock;
    use crate::types::{Fragment, FragmentId, LifecycleState, RelationType, ThreadId};
    use chrono::TimeZone;

    fn t(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn frag(id: &str, hours: i64, topics: &[&str]) -> Fragment {
        Fragment::new(id, format!("hash-{}", id), t(hours), t(hours)).with_topics(topics.iter().copied())
    }

    fn log_of(fragments: Vec<Fragment>) -> EventLog {
        let ticks = (0..fragments.len() as i64).map(|i| t(5000 + i)).collect();
        let mut clock = LogicalClock::replay(ticks);
        let mut log = EventLog::new();
        for fragment in fragments {
            log.append(fragment, &mut clock).unwrap();
        }
        log
    }

    fn ids(names: &[&str]) -> Vec<FragmentId> {
        names.iter().map(|n| FragmentId::new(*n)).collect()
    }

    #[test]
    fn test_config_validation() {
        assert!(StateMachineConfig::default().validate().is_ok());

        let inverted = StateMachineConfig {
            dormancy_hours: 900,
            ..StateMachineConfig::default()
        };
        assert!(matches!(inverted.validate(), Err(CoreError::InvalidConfig(_))));

        let overlap = StateMachineConfig {
            topic_overlap_min: 0.0,
            ..StateMachineConfig::default()
        };
        assert!(overlap.validate().is_err());
    }

    #[test]
    fn test_thresholds_beyond_duration_range_rejected() {
        let huge = StateMachineConfig {
            termination_hours: 9_000_000_000_000,
            ..StateMachineConfig::default()
        };
        let err = huge.validate().unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(ref m) if m.contains("termination_hours")));

        // Unvalidated thresholds saturate instead of panicking
        let log = log_of(vec![frag("f1", 0, &["a"]), frag("f2", 2, &["a"])]);
        let state = StateMachine::new(huge).derive_state(&log, None, t(10_000)).unwrap();
        assert_eq!(state.threads.len(), 1);
        assert_eq!(state.threads[0].lifecycle_state, LifecycleState::Dormant);
    }

    #[test]
    fn test_empty_log_derives_empty_state() {
        let machine = StateMachine::default();
        let state = machine.derive_state(&EventLog::new(), None, t(0)).unwrap();
        assert!(state.is_empty());
        assert_eq!(state.at_sequence, LogSequence::ZERO);
    }

    #[test]
    fn test_until_beyond_head_is_rejected() {
        let log = log_of(vec![frag("f1", 0, &["a"])]);
        let err = StateMachine::default()
            .derive_state(&log, Some(LogSequence::new(5)), t(1))
            .unwrap_err();
        assert!(matches!(err, CoreError::SequenceOutOfRange { .. }));
    }

    #[test]
    fn test_shared_topic_forms_one_active_thread() {
        let log = log_of(vec![frag("f1", 0, &["a"]), frag("f2", 2, &["a"])]);
        let state = StateMachine::default().derive_state(&log, None, t(3)).unwrap();

        assert_eq!(state.threads.len(), 1);
        let thread = &state.threads[0];
        assert_eq!(thread.lifecycle_state, LifecycleState::Active);
        assert_eq!(thread.member_fragment_ids, ids(&["f1", "f2"]));
        assert!(state.absences.is_empty());
    }

    #[test]
    fn test_prefix_derivation_sees_only_prefix() {
        let log = log_of(vec![frag("f1", 0, &["a"]), frag("f2", 2, &["a"])]);
        let state = StateMachine::default()
            .derive_state(&log, Some(LogSequence::new(1)), t(3))
            .unwrap();
        assert_eq!(state.threads[0].member_fragment_ids, ids(&["f1"]));
        assert_eq!(state.threads[0].lifecycle_state, LifecycleState::Emerging);
    }

    #[test]
    fn test_unrelated_topics_found_separate_threads() {
        let log = log_of(vec![frag("f1", 0, &["a"]), frag("f2", 1, &["b"])]);
        let state = StateMachine::default().derive_state(&log, None, t(2)).unwrap();
        assert_eq!(state.threads.len(), 2);
        assert!(state
            .threads
            .iter()
            .all(|t| t.lifecycle_state == LifecycleState::Emerging));
    }

    #[test]
    fn test_state_hash_depends_on_reference_time_only_through_content() {
        let log = log_of(vec![frag("f1", 0, &["a"]), frag("f2", 2, &["a"])]);
        let machine = StateMachine::default();
        let a = machine.derive_state(&log, None, t(3)).unwrap();
        let b = machine.derive_state(&log, None, t(4)).unwrap();
        assert_eq!(a.state_hash, b.state_hash);

        let dormant = machine.derive_state(&log, None, t(500)).unwrap();
        assert_ne!(a.state_hash, dormant.state_hash);
    }

    #[test]
    fn test_dangling_relation_fails_derivation() {
        let log = log_of(vec![
            frag("f1", 0, &["a"]).with_relation("ghost", RelationType::Reference)
        ]);
        let err = StateMachine::default().derive_state(&log, None, t(1)).unwrap_err();
        match err {
            CoreError::DanglingRelation { fragment_id, target } => {
                assert_eq!(fragment_id, FragmentId::new("f1"));
                assert_eq!(target, FragmentId::new("ghost"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_relation_to_later_fragment_joins_its_thread() {
        let log = log_of(vec![
            frag("f1", 0, &["x"]).with_relation("f2", RelationType::Continuation),
            frag("f2", 1, &["y"]),
        ]);
        let state = StateMachine::default().derive_state(&log, None, t(2)).unwrap();
        assert_eq!(state.threads.len(), 1);
        assert_eq!(state.threads[0].member_fragment_ids, ids(&["f1", "f2"]));
        assert_eq!(state.threads[0].relations.len(), 1);
    }

    #[test]
    fn test_gap_beyond_dormancy_records_marker() {
        let config = StateMachineConfig {
            dormancy_hours: 24,
            ..StateMachineConfig::default()
        };
        let log = log_of(vec![frag("f1", 0, &["a"]), frag("f2", 720, &["a"])]);
        let state = StateMachine::new(config).derive_state(&log, None, t(721)).unwrap();

        assert_eq!(state.threads.len(), 1);
        assert_eq!(state.absences.len(), 1);
        let marker = &state.absences[0];
        assert_eq!(marker.gap_start, t(0));
        assert_eq!(marker.gap_end, Some(t(720)));
        assert_eq!(state.threads[0].lifecycle_state, LifecycleState::Active);
    }

    #[test]
    fn test_disconnected_graph_splits_thread() {
        // f2 only links to f1 by relation; f3 shares f1's topic but sits
        // outside the adjacency window of every member.
        let log = log_of(vec![
            frag("f1", 0, &["a"]),
            frag("f2", 500, &["b"]).with_relation("f1", RelationType::Continuation),
            frag("f3", 1000, &["a"]),
        ]);
        let state = StateMachine::default().derive_state(&log, None, t(1001)).unwrap();

        assert_eq!(state.threads.len(), 2);
        assert_eq!(state.divergences.len(), 1);
        let record = &state.divergences[0];
        assert_eq!(record.trigger, FragmentId::new("f3"));
        assert_eq!(record.at_sequence, LogSequence::new(3));

        let origin = state.thread(&record.origin).unwrap();
        assert_eq!(origin.thread_id, ThreadId::founded_by(&FragmentId::new("f1")));
        assert_eq!(origin.member_fragment_ids, ids(&["f1", "f2"]));
        assert_eq!(origin.lifecycle_state, LifecycleState::Terminated);

        let branch = state.thread(&record.branches[0]).unwrap();
        assert_eq!(branch.member_fragment_ids, ids(&["f3"]));
        assert_eq!(branch.diverged_from.as_ref(), Some(&record.origin));
        assert_eq!(branch.lifecycle_state, LifecycleState::Active);
    }

    #[test]
    fn test_split_keeping_trigger_leaves_origin_diverged() {
        let log = log_of(vec![
            frag("f1", 1000, &["a"]),
            frag("f2", 1900, &["b"]).with_relation("f1", RelationType::Continuation),
            frag("f0", 900, &["b"]),
        ]);
        let state = StateMachine::default().derive_state(&log, None, t(950)).unwrap();

        assert_eq!(state.threads.len(), 2);
        let origin = state.thread_containing(&FragmentId::new("f0")).unwrap();
        assert_eq!(origin.member_fragment_ids, ids(&["f0"]));
        assert_eq!(origin.lifecycle_state, LifecycleState::Diverged);
        assert!(!origin.is_branch());

        let branch = state.thread_containing(&FragmentId::new("f1")).unwrap();
        assert_eq!(branch.member_fragment_ids, ids(&["f1", "f2"]));
        assert_eq!(branch.lifecycle_state, LifecycleState::Active);
        assert!(branch.is_branch());
    }

    #[test]
    fn test_no_fragment_shared_between_views() {
        let log = log_of(vec![
            frag("f1", 0, &["a"]),
            frag("f2", 500, &["b"]).with_relation("f1", RelationType::Continuation),
            frag("f3", 1000, &["a"]),
            frag("f4", 1001, &["a"]),
        ]);
        let state = StateMachine::default().derive_state(&log, None, t(1002)).unwrap();

        let mut seen = std::collections::HashSet::new();
        for thread in &state.threads {
            for id in &thread.member_fragment_ids {
                assert!(seen.insert(id.clone()), "{} appears twice", id);
            }
        }
        assert_eq!(seen.len(), 4);
    }
}
