//! One walk over the log
//!
//! ```text
//! entry ─► relation check ─► matcher ─┬─► attach (+ gap marker) ─► topology ─► split?
//!                                     └─► found new thread
//! ```
//!
//! Everything here is scoped to a single `derive_state` call and borrows the
//! log read-only.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::builder::{Member, ThreadBuilder};
use super::matcher::ThreadMatcher;
use super::StateMachineConfig;
use crate::error::{CoreError, CoreResult};
use crate::event_log::EventLog;
use crate::topology::TopologyEngine;
use crate::types::{
    DerivedState, DivergenceRecord, Fragment, FragmentId, LogEntry, LogSequence, ThreadId,
    ThreadView,
};
use crate::utils::sha256_hex;

pub(crate) struct Derivation<'a> {
    config: &'a StateMachineConfig,
    log: &'a EventLog,
    matcher: ThreadMatcher,
    topology: TopologyEngine,
    /// In creation order
    threads: Vec<ThreadBuilder<'a>>,
    membership: HashMap<FragmentId, usize>,
    /// Not-yet-seen fragment -> processed fragments that declared a relation to it
    inbound: HashMap<FragmentId, Vec<FragmentId>>,
    divergences: Vec<DivergenceRecord>,
}

impl<'a> Derivation<'a> {
    pub fn new(config: &'a StateMachineConfig, log: &'a EventLog) -> Self {
        Self {
            config,
            log,
            matcher: ThreadMatcher::new(config),
            topology: TopologyEngine::new(),
            threads: Vec::new(),
            membership: HashMap::new(),
            inbound: HashMap::new(),
            divergences: Vec::new(),
        }
    }

    pub fn process(&mut self, entry: &'a LogEntry) -> CoreResult<()> {
        let fragment = entry.fragment();
        let sequence = entry.sequence();
        self.check_relations(fragment)?;

        let anchors = self.anchors_for(fragment);
        let candidate =
            self.matcher
                .find_candidate(fragment, &anchors, &self.threads, &self.membership);

        match candidate {
            Some(found) => {
                let index = found.thread_index;
                let thread = &mut self.threads[index];
                trace!(
                    fragment_id = %fragment.fragment_id,
                    thread_id = %thread.thread_id,
                    reason = ?found.reason,
                    "Fragment joins thread"
                );
                if let Some(marker) = thread.attach(fragment, sequence, self.config.dormancy()) {
                    debug!(
                        thread_id = %marker.thread_id,
                        marker_id = %marker.marker_id,
                        "Recorded absence before resumed activity"
                    );
                }
                self.membership.insert(fragment.fragment_id.clone(), index);
                self.check_divergence(index, &fragment.fragment_id, sequence);
            }
            None => {
                let thread = ThreadBuilder::founded(fragment, sequence);
                trace!(thread_id = %thread.thread_id, "Fragment founds thread");
                self.membership
                    .insert(fragment.fragment_id.clone(), self.threads.len());
                self.threads.push(thread);
            }
        }

        self.record_inbound(fragment);
        Ok(())
    }

    /// Every relation endpoint must be a fragment of this log
    fn check_relations(&self, fragment: &Fragment) -> CoreResult<()> {
        for relation in &fragment.explicit_relations {
            for endpoint in [&relation.source, &relation.target] {
                if !self.log.contains_fragment(endpoint) {
                    return Err(CoreError::DanglingRelation {
                        fragment_id: fragment.fragment_id.clone(),
                        target: endpoint.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Own relations in listed order, then earlier fragments pointing here
    fn anchors_for(&self, fragment: &Fragment) -> Vec<FragmentId> {
        let id = &fragment.fragment_id;
        let mut anchors: Vec<FragmentId> = fragment
            .explicit_relations
            .iter()
            .flat_map(|relation| relation.endpoints_other_than(id))
            .cloned()
            .collect();
        if let Some(pointing_here) = self.inbound.get(id) {
            anchors.extend(pointing_here.iter().cloned());
        }
        anchors
    }

    fn record_inbound(&mut self, fragment: &Fragment) {
        let id = &fragment.fragment_id;
        for relation in &fragment.explicit_relations {
            for endpoint in relation.endpoints_other_than(id) {
                if !self.membership.contains_key(endpoint) {
                    self.inbound
                        .entry(endpoint.clone())
                        .or_default()
                        .push(id.clone());
                }
            }
        }
    }

    fn check_divergence(&mut self, index: usize, trigger: &FragmentId, sequence: LogSequence) {
        let thread = &self.threads[index];
        let member_ids: Vec<FragmentId> = thread.members().iter().map(|m| m.id().clone()).collect();
        let edges = thread.structural_edges(self.config.adjacency_window());
        let known: BTreeSet<ThreadId> = BTreeSet::from([thread.thread_id.clone()]);

        self.topology.build_graph(&member_ids, edges);
        let components = self.topology.detect_structural_divergence(&known);
        if !components.is_empty() {
            self.split(index, components, trigger, sequence);
        }
    }

    /// Split a thread along its components
    ///
    /// The component holding the earliest member (event time, then sequence)
    /// keeps the thread id. The others become branches.
    fn split(
        &mut self,
        index: usize,
        components: Vec<BTreeSet<FragmentId>>,
        trigger: &FragmentId,
        sequence: LogSequence,
    ) {
        let origin = &self.threads[index];
        let mut keyed: Vec<_> = components
            .into_iter()
            .filter_map(|component| {
                origin
                    .earliest_in(&component)
                    .map(|first| (first.order_key(), first.id().clone(), component))
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut ordered = keyed.into_iter();
        let Some((_, _, kept)) = ordered.next() else {
            return;
        };

        let origin_id = self.threads[index].thread_id.clone();
        let (moved_members, moved_markers) = self.threads[index].retain_component(&kept);

        let mut branches = Vec::new();
        for (_, first, component) in ordered {
            let branch_id = ThreadId::branch_of(&origin_id, &first);
            let members: Vec<Member<'a>> = moved_members
                .iter()
                .filter(|m| component.contains(m.id()))
                .copied()
                .collect();
            let markers = moved_markers
                .iter()
                .filter(|marker| {
                    marker
                        .closed_by
                        .as_ref()
                        .is_some_and(|closer| component.contains(closer))
                })
                .cloned()
                .map(|marker| marker.moved_to(branch_id.clone()))
                .collect();

            let branch_index = self.threads.len();
            for member in &members {
                self.membership.insert(member.id().clone(), branch_index);
            }
            self.threads.push(ThreadBuilder::branch(
                branch_id.clone(),
                origin_id.clone(),
                members,
                markers,
            ));
            branches.push(branch_id);
        }

        let closed = !kept.contains(trigger);
        self.threads[index].mark_diverged(sequence, closed);

        debug!(
            origin = %origin_id,
            branches = branches.len(),
            sequence = sequence.value(),
            origin_closed = closed,
            "Structural divergence split thread"
        );
        self.divergences.push(DivergenceRecord {
            origin: origin_id,
            branches,
            at_sequence: sequence,
            trigger: trigger.clone(),
        });
    }

    pub fn finish(self, at_sequence: LogSequence, reference_time: DateTime<Utc>) -> DerivedState {
        let threads: Vec<ThreadView> = self
            .threads
            .iter()
            .map(|t| t.build_view(at_sequence, reference_time, self.config))
            .collect();
        let absences = threads
            .iter()
            .flat_map(|t| t.absence_markers.iter().cloned())
            .collect();
        let state_hash = combined_state_hash(at_sequence, &threads);

        DerivedState {
            at_sequence,
            reference_time,
            state_hash,
            threads,
            absences,
            divergences: self.divergences,
        }
    }
}

/// Hash over the sequence and every thread's hash, sorted by thread id
pub(crate) fn combined_state_hash(at_sequence: LogSequence, threads: &[ThreadView]) -> String {
    let mut pairs: Vec<(&ThreadId, &str)> = threads
        .iter()
        .map(|t| (&t.thread_id, t.state_hash.as_str()))
        .collect();
    pairs.sort();

    let mut canonical = format!("{}|", at_sequence);
    for (thread_id, hash) in pairs {
        canonical.push_str(&format!("{}:{}|", thread_id, hash));
    }
    sha256_hex(&canonical)
}
