//! Per-thread accumulator used while walking the log
//!
//! A builder only lives for the duration of one derivation. It borrows the
//! fragments from the log and turns into a `ThreadView` at the end.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};

use super::lifecycle::{classify, LifecycleInput};
use super::StateMachineConfig;
use crate::topology::StructuralEdge;
use crate::types::{
    AbsenceMarker, Fragment, FragmentId, FragmentRelation, LogSequence, ThreadId, ThreadView,
    VersionId,
};
use crate::utils::{sha256_hex, to_iso};

/// A fragment as a thread member
#[derive(Debug, Clone, Copy)]
pub(crate) struct Member<'a> {
    pub fragment: &'a Fragment,
    pub sequence: LogSequence,
}

impl<'a> Member<'a> {
    pub fn id(&self) -> &'a FragmentId {
        &self.fragment.fragment_id
    }

    /// Display and tie-break order: event time, then log sequence
    pub fn order_key(&self) -> (DateTime<Utc>, LogSequence) {
        (self.fragment.event_timestamp, self.sequence)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ThreadBuilder<'a> {
    pub thread_id: ThreadId,
    members: Vec<Member<'a>>,
    topics: BTreeSet<&'a str>,
    first_activity: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    last_sequence: LogSequence,
    markers: Vec<AbsenceMarker>,
    diverged_from: Option<ThreadId>,
    diverged_at: Option<LogSequence>,
    closed: bool,
}

impl<'a> ThreadBuilder<'a> {
    /// New thread started by `fragment`
    pub fn founded(fragment: &'a Fragment, sequence: LogSequence) -> Self {
        let member = Member { fragment, sequence };
        let mut builder = Self {
            thread_id: ThreadId::founded_by(&fragment.fragment_id),
            members: vec![member],
            topics: BTreeSet::new(),
            first_activity: fragment.event_timestamp,
            last_activity: fragment.event_timestamp,
            last_sequence: sequence,
            markers: Vec::new(),
            diverged_from: None,
            diverged_at: None,
            closed: false,
        };
        builder.recompute();
        builder
    }

    /// Thread carved out of `origin` by a split
    pub fn branch(
        thread_id: ThreadId,
        origin: ThreadId,
        members: Vec<Member<'a>>,
        markers: Vec<AbsenceMarker>,
    ) -> Self {
        let mut builder = Self {
            thread_id,
            members,
            topics: BTreeSet::new(),
            first_activity: DateTime::<Utc>::default(),
            last_activity: DateTime::<Utc>::default(),
            last_sequence: LogSequence::ZERO,
            markers,
            diverged_from: Some(origin),
            diverged_at: None,
            closed: false,
        };
        builder.recompute();
        builder
    }

    pub fn members(&self) -> &[Member<'a>] {
        &self.members
    }

    pub fn topics(&self) -> &BTreeSet<&'a str> {
        &self.topics
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    /// Distance from `ts` to the activity span; zero inside it
    pub fn span_distance(&self, ts: DateTime<Utc>) -> Duration {
        if ts < self.first_activity {
            self.first_activity - ts
        } else if ts > self.last_activity {
            ts - self.last_activity
        } else {
            Duration::zero()
        }
    }

    /// Add `fragment`, recording an absence marker if it ends a long silence
    pub fn attach(
        &mut self,
        fragment: &'a Fragment,
        sequence: LogSequence,
        dormancy: Duration,
    ) -> Option<&AbsenceMarker> {
        let gap = fragment.event_timestamp - self.last_activity;
        let recorded = if gap > dormancy {
            self.markers.push(AbsenceMarker::closed(
                self.thread_id.clone(),
                self.last_activity,
                fragment.event_timestamp,
                fragment.fragment_id.clone(),
            ));
            true
        } else {
            false
        };

        self.members.push(Member { fragment, sequence });
        self.recompute();

        if recorded {
            self.markers.last()
        } else {
            None
        }
    }

    /// Earliest member of `component` by event time, then sequence
    pub fn earliest_in(&self, component: &BTreeSet<FragmentId>) -> Option<Member<'a>> {
        self.members
            .iter()
            .filter(|m| component.contains(m.id()))
            .min_by_key(|m| m.order_key())
            .copied()
    }

    /// Keep only the members in `component`; hand back the rest with their markers
    pub fn retain_component(
        &mut self,
        component: &BTreeSet<FragmentId>,
    ) -> (Vec<Member<'a>>, Vec<AbsenceMarker>) {
        let (kept, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut self.members)
            .into_iter()
            .partition(|m| component.contains(m.id()));
        let (kept_markers, removed_markers): (Vec<_>, Vec<_>) =
            self.markers.drain(..).partition(|marker| {
                marker
                    .closed_by
                    .as_ref()
                    .is_some_and(|closer| component.contains(closer))
            });

        self.members = kept;
        self.markers = kept_markers;
        self.recompute();
        (removed, removed_markers)
    }

    pub fn mark_diverged(&mut self, at_sequence: LogSequence, closed: bool) {
        self.diverged_at = Some(at_sequence);
        self.closed = closed;
    }

    /// Explicit relations among members plus topic continuity edges
    ///
    /// Two members are continuous when they share a topic and their event
    /// times lie within `window` of each other.
    pub fn structural_edges(&self, window: Duration) -> Vec<StructuralEdge> {
        let ids: HashSet<&FragmentId> = self.members.iter().map(|m| m.id()).collect();
        let mut edges = Vec::new();

        for member in &self.members {
            for relation in &member.fragment.explicit_relations {
                if ids.contains(&relation.source) && ids.contains(&relation.target) {
                    edges.push(StructuralEdge::from(relation));
                }
            }
        }

        for (i, a) in self.members.iter().enumerate() {
            for b in &self.members[i + 1..] {
                let (x, y) = (a.fragment.event_timestamp, b.fragment.event_timestamp);
                let apart = if x > y { x - y } else { y - x };
                if apart <= window && a.fragment.shares_topic_with(b.fragment) {
                    edges.push(StructuralEdge::new(a.id().clone(), b.id().clone()));
                }
            }
        }

        edges
    }

    fn recompute(&mut self) {
        self.topics = self
            .members
            .iter()
            .flat_map(|m| m.fragment.topics.iter().map(String::as_str))
            .collect();
        if let Some(first) = self.members.iter().map(|m| m.fragment.event_timestamp).min() {
            self.first_activity = first;
        }
        if let Some(last) = self.members.iter().map(|m| m.fragment.event_timestamp).max() {
            self.last_activity = last;
        }
        if let Some(seq) = self.members.iter().map(|m| m.sequence).max() {
            self.last_sequence = seq;
        }
    }

    /// Freeze into a view as of `at_sequence`, judged at `reference_time`
    pub fn build_view(
        &self,
        at_sequence: LogSequence,
        reference_time: DateTime<Utc>,
        config: &StateMachineConfig,
    ) -> ThreadView {
        let mut ordered = self.members.clone();
        ordered.sort_by_key(Member::order_key);
        let member_fragment_ids: Vec<FragmentId> = ordered.iter().map(|m| m.id().clone()).collect();

        let ids: HashSet<&FragmentId> = member_fragment_ids.iter().collect();
        let mut relations: Vec<FragmentRelation> = self
            .members
            .iter()
            .flat_map(|m| m.fragment.explicit_relations.iter())
            .filter(|r| !r.is_self_loop() && ids.contains(&r.source) && ids.contains(&r.target))
            .cloned()
            .collect();
        relations.sort_by(|a, b| {
            (&a.source, &a.target, a.relation_type).cmp(&(&b.source, &b.target, b.relation_type))
        });
        relations.dedup();

        let silence = reference_time - self.last_activity;
        let mut absence_markers = self.markers.clone();
        if silence > config.dormancy() {
            absence_markers.push(AbsenceMarker::open(self.thread_id.clone(), self.last_activity));
        }
        absence_markers.sort_by(|a, b| {
            (a.gap_start, &a.marker_id).cmp(&(b.gap_start, &b.marker_id))
        });

        let lifecycle_state = classify(
            config,
            &LifecycleInput {
                fragment_count: self.members.len(),
                silence,
                closed: self.closed,
                awaiting_activity_after_split: self.diverged_at == Some(self.last_sequence),
                is_branch: self.diverged_from.is_some(),
            },
        );

        let canonical = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.thread_id,
            lifecycle_state,
            to_iso(&self.first_activity),
            to_iso(&self.last_activity),
            join(member_fragment_ids.iter()),
            join(relations
                .iter()
                .map(|r| format!("{}>{}:{}", r.source, r.target, r.relation_type))),
            join(absence_markers.iter().map(|m| &m.marker_id)),
            self.diverged_from.as_ref().map_or("-", ThreadId::as_str),
        );
        let state_hash = sha256_hex(&canonical);
        let version_id = VersionId::generate(self.thread_id.as_str(), at_sequence, Some(&state_hash));

        ThreadView {
            thread_id: self.thread_id.clone(),
            version_id,
            at_sequence,
            lifecycle_state,
            member_fragment_ids,
            topics: self.topics.iter().map(|t| t.to_string()).collect(),
            relations,
            absence_markers,
            first_activity: self.first_activity,
            last_activity: self.last_activity,
            diverged_from: self.diverged_from.clone(),
            state_hash,
        }
    }
}

fn join<I, T>(items: I) -> String
where
    I: Iterator<Item = T>,
    T: std::fmt::Display,
{
    items.map(|item| item.to_string()).collect::<Vec<_>>().join(",")
}
