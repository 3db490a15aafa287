//! Thread matcher
//!
//! Decides whether a fragment extends an existing thread:
//!
//! 1. Explicit relation: the first anchor fragment that sits in an open
//!    thread decides, regardless of topics or timing.
//! 2. Topic match: overlap ratio at least the minimum, event time within the
//!    adjacency window of the thread's activity span, and the thread not
//!    already silent past termination. Highest ratio wins, then the smallest
//!    distance, then the earliest-created thread.
//!
//! No candidate means the fragment founds a new thread.

use std::collections::{BTreeSet, HashMap};

use chrono::Duration;

use super::builder::ThreadBuilder;
use super::StateMachineConfig;
use crate::types::{Fragment, FragmentId};

/// Why a fragment joined a thread
#[derive(Debug, Clone, PartialEq)]
pub enum MatchReason {
    ExplicitRelation { anchor: FragmentId },
    TopicOverlap { ratio: f64, distance_hours: f64 },
}

/// Chosen thread for a fragment
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadMatch {
    /// Position of the thread in creation order
    pub thread_index: usize,
    pub reason: MatchReason,
}

#[derive(Debug, Clone)]
pub struct ThreadMatcher {
    topic_overlap_min: f64,
    adjacency_window: Duration,
    termination: Duration,
}

impl ThreadMatcher {
    pub fn new(config: &StateMachineConfig) -> Self {
        Self {
            topic_overlap_min: config.topic_overlap_min,
            adjacency_window: config.adjacency_window(),
            termination: config.termination(),
        }
    }

    /// Share of the fragment's topics already present in the thread
    pub fn topic_overlap(fragment_topics: &BTreeSet<String>, thread_topics: &BTreeSet<&str>) -> f64 {
        if fragment_topics.is_empty() {
            return 0.0;
        }
        let shared = fragment_topics
            .iter()
            .filter(|t| thread_topics.contains(t.as_str()))
            .count();
        shared as f64 / fragment_topics.len() as f64
    }

    pub(crate) fn find_candidate(
        &self,
        fragment: &Fragment,
        anchors: &[FragmentId],
        threads: &[ThreadBuilder<'_>],
        membership: &HashMap<FragmentId, usize>,
    ) -> Option<ThreadMatch> {
        for anchor in anchors {
            if let Some(&thread_index) = membership.get(anchor) {
                if threads[thread_index].is_open() {
                    return Some(ThreadMatch {
                        thread_index,
                        reason: MatchReason::ExplicitRelation {
                            anchor: anchor.clone(),
                        },
                    });
                }
            }
        }

        let mut best: Option<(usize, f64, Duration)> = None;
        for (index, thread) in threads.iter().enumerate() {
            if !thread.is_open() {
                continue;
            }
            if fragment.event_timestamp - thread.last_activity() > self.termination {
                continue;
            }
            let distance = thread.span_distance(fragment.event_timestamp);
            if distance > self.adjacency_window {
                continue;
            }
            let ratio = Self::topic_overlap(&fragment.topics, thread.topics());
            if ratio == 0.0 || ratio < self.topic_overlap_min {
                continue;
            }

            let better = match best {
                None => true,
                Some((_, best_ratio, best_distance)) => {
                    ratio > best_ratio || (ratio == best_ratio && distance < best_distance)
                }
            };
            if better {
                best = Some((index, ratio, distance));
            }
        }

        best.map(|(thread_index, ratio, distance)| ThreadMatch {
            thread_index,
            reason: MatchReason::TopicOverlap {
                ratio,
                distance_hours: distance.num_milliseconds() as f64 / 3_600_000.0,
            },
        })
    }
}
