//! Derived thread types
//!
//! Threads are views computed from the log. None of these values is ever
//! stored as mutable state; each derivation produces them fresh.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FragmentId, FragmentRelation, LogSequence, ThreadId, VersionId};
use crate::utils::{hours_between, short_hash, to_iso};

/// Lifecycle of a thread at a reference time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Still accumulating its first fragments
    Emerging,
    /// Receiving updates
    Active,
    /// Silent for longer than the dormancy threshold
    Dormant,
    /// Silent past the termination threshold, or closed by a split
    Terminated,
    /// Just split into several incompatible paths
    Diverged,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Emerging => "emerging",
            LifecycleState::Active => "active",
            LifecycleState::Dormant => "dormant",
            LifecycleState::Terminated => "terminated",
            LifecycleState::Diverged => "diverged",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit record of a silence interval in a thread
///
/// A closed marker spans `[gap_start, gap_end)` and names the fragment that
/// ended the silence. An open marker has no `gap_end`: the thread is still
/// silent at the reference time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsenceMarker {
    pub marker_id: String,
    pub thread_id: ThreadId,
    pub gap_start: DateTime<Utc>,
    pub gap_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_by: Option<FragmentId>,
}

impl AbsenceMarker {
    /// Silence that ended when `closed_by` arrived
    ///
    /// The id depends on the closing fragment and the gap start only, so a
    /// marker keeps its id when a split moves it to another thread.
    pub fn closed(
        thread_id: ThreadId,
        gap_start: DateTime<Utc>,
        gap_end: DateTime<Utc>,
        closed_by: FragmentId,
    ) -> Self {
        let marker_id = format!(
            "gap_{}",
            short_hash(&format!("gap|{}|{}", closed_by, to_iso(&gap_start)), 12)
        );
        Self {
            marker_id,
            thread_id,
            gap_start,
            gap_end: Some(gap_end),
            closed_by: Some(closed_by),
        }
    }

    /// Silence still ongoing at the reference time
    pub fn open(thread_id: ThreadId, gap_start: DateTime<Utc>) -> Self {
        let marker_id = format!(
            "gap_{}",
            short_hash(&format!("open|{}|{}", thread_id, to_iso(&gap_start)), 12)
        );
        Self {
            marker_id,
            thread_id,
            gap_start,
            gap_end: None,
            closed_by: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.gap_end.is_none()
    }

    /// Length of the gap in hours; open gaps are measured up to `reference_time`
    pub fn duration_hours(&self, reference_time: &DateTime<Utc>) -> f64 {
        let end = self.gap_end.unwrap_or(*reference_time);
        hours_between(&end, &self.gap_start)
    }

    /// Same marker attributed to another thread
    pub(crate) fn moved_to(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = thread_id;
        self
    }
}

/// Snapshot of one thread as of `at_sequence`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadView {
    pub thread_id: ThreadId,
    pub version_id: VersionId,
    pub at_sequence: LogSequence,
    pub lifecycle_state: LifecycleState,
    /// Ordered by event time, then log sequence
    pub member_fragment_ids: Vec<FragmentId>,
    pub topics: Vec<String>,
    /// Explicit relations whose endpoints are both members
    pub relations: Vec<FragmentRelation>,
    pub absence_markers: Vec<AbsenceMarker>,
    pub first_activity: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diverged_from: Option<ThreadId>,
    pub state_hash: String,
}

impl ThreadView {
    pub fn fragment_count(&self) -> usize {
        self.member_fragment_ids.len()
    }

    pub fn contains(&self, fragment_id: &FragmentId) -> bool {
        self.member_fragment_ids.contains(fragment_id)
    }

    pub fn has_absence(&self) -> bool {
        !self.absence_markers.is_empty()
    }

    pub fn is_branch(&self) -> bool {
        self.diverged_from.is_some()
    }
}

/// One structural split observed during a derivation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergenceRecord {
    /// Thread that kept its id
    pub origin: ThreadId,
    /// Fresh ids given to the other components
    pub branches: Vec<ThreadId>,
    pub at_sequence: LogSequence,
    /// Fragment whose attachment disconnected the graph
    pub trigger: FragmentId,
}

/// Complete output of one derivation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedState {
    pub at_sequence: LogSequence,
    pub reference_time: DateTime<Utc>,
    pub state_hash: String,
    /// In creation order
    pub threads: Vec<ThreadView>,
    pub absences: Vec<AbsenceMarker>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub divergences: Vec<DivergenceRecord>,
}

impl DerivedState {
    pub fn thread(&self, thread_id: &ThreadId) -> Option<&ThreadView> {
        self.threads.iter().find(|t| &t.thread_id == thread_id)
    }

    pub fn thread_containing(&self, fragment_id: &FragmentId) -> Option<&ThreadView> {
        self.threads.iter().find(|t| t.contains(fragment_id))
    }

    pub fn threads_in(&self, state: LifecycleState) -> impl Iterator<Item = &ThreadView> {
        self.threads.iter().filter(move |t| t.lifecycle_state == state)
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}
