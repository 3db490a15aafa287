//! Version tracker
//!
//! Every derivation records one `VersionedThread` per thread view. Versions
//! live in a single arena indexed by `VersionId`; the parent link is a lookup
//! key, never a reference. A branch's first version is parented on the origin
//! thread's latest version, which turns the per-thread lists into a DAG.
//!
//! The arena is append-only and has a single writer (the replay engine).
//! A tracker restored from `snapshots.jsonl` knows every persisted id and the
//! head of every persisted thread, so lineage continues across restarts.

mod dag;

pub use dag::VersionDag;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::error::{CoreError, CoreResult};
use crate::types::{SnapshotRecord, ThreadId, ThreadLineage, ThreadView, VersionId, VersionedThread};
use crate::utils::parse_iso;

/// A version known from disk but not yet seen in this session
#[derive(Debug, Clone)]
struct Persisted {
    position: usize,
    parent_version_id: Option<VersionId>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct TrackerCheckpoint {
    len: usize,
    heads: BTreeMap<ThreadId, VersionId>,
    next_position: usize,
}

#[derive(Debug, Clone, Default)]
pub struct VersionTracker {
    versions: Vec<VersionedThread>,
    by_id: HashMap<VersionId, usize>,
    /// Arena indices per thread, keyed by recording position
    by_thread: BTreeMap<ThreadId, BTreeMap<usize, usize>>,
    heads: BTreeMap<ThreadId, VersionId>,
    persisted: HashMap<VersionId, Persisted>,
    next_position: usize,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from persisted snapshot records
    ///
    /// The records must form a valid DAG. Their ids count as recorded and the
    /// last record of each thread becomes its head.
    pub fn restore(records: &[SnapshotRecord]) -> CoreResult<Self> {
        VersionDag::from_records(records)?;

        let mut tracker = Self::new();
        for (position, record) in records.iter().enumerate() {
            let created_at = parse_iso(&record.created_at).map_err(|e| {
                CoreError::structural(
                    position as u64 + 1,
                    format!(
                        "version {} has unreadable created_at {:?}: {}",
                        record.version_id, record.created_at, e
                    ),
                )
            })?;
            tracker
                .heads
                .insert(record.thread_id.clone(), record.version_id.clone());
            tracker.persisted.insert(
                record.version_id.clone(),
                Persisted {
                    position,
                    parent_version_id: record.previous_version_id.clone(),
                    created_at,
                },
            );
        }
        tracker.next_position = records.len();

        debug!(
            versions = records.len(),
            threads = tracker.heads.len(),
            "Restored version tracker"
        );
        Ok(tracker)
    }

    /// Whether `version_id` was recorded here or restored from disk
    pub fn contains(&self, version_id: &VersionId) -> bool {
        self.by_id.contains_key(version_id) || self.persisted.contains_key(version_id)
    }

    /// Record `view` as the newest version of its thread
    ///
    /// Recording the same view twice is a no-op: the version id is derived
    /// from thread, sequence and state hash, so it names the same version.
    /// A view whose version was restored keeps its persisted parent and
    /// creation time and does not move the thread's head.
    pub fn record_version(&mut self, view: &ThreadView, created_at: DateTime<Utc>) -> &VersionedThread {
        if let Some(&existing) = self.by_id.get(&view.version_id) {
            return &self.versions[existing];
        }

        let (position, parent_version_id, created_at) = match self.persisted.get(&view.version_id) {
            Some(persisted) => (
                persisted.position,
                persisted.parent_version_id.clone(),
                persisted.created_at,
            ),
            None => {
                let parent = self
                    .heads
                    .get(&view.thread_id)
                    .or_else(|| {
                        view.diverged_from
                            .as_ref()
                            .and_then(|origin| self.heads.get(origin))
                    })
                    .cloned();
                let position = self.next_position;
                self.next_position += 1;
                self.heads
                    .insert(view.thread_id.clone(), view.version_id.clone());
                (position, parent, created_at)
            }
        };

        let version = VersionedThread {
            thread_id: view.thread_id.clone(),
            version_id: view.version_id.clone(),
            at_sequence: view.at_sequence,
            state_hash: view.state_hash.clone(),
            parent_version_id,
            created_at,
            fragment_count: view.fragment_count(),
            lifecycle_state: view.lifecycle_state,
            absence_detected: view.has_absence(),
        };
        trace!(
            thread_id = %version.thread_id,
            version_id = %version.version_id,
            parent = ?version.parent_version_id,
            "Recorded version"
        );

        let index = self.versions.len();
        self.by_id.insert(version.version_id.clone(), index);
        self.by_thread
            .entry(version.thread_id.clone())
            .or_default()
            .insert(position, index);
        self.versions.push(version);
        &self.versions[index]
    }

    /// Head of the thread, when that version is loaded in this session
    pub fn latest(&self, thread_id: &ThreadId) -> Option<&VersionedThread> {
        self.heads
            .get(thread_id)
            .and_then(|version_id| self.get_version(version_id))
    }

    /// Versions of `thread_id` loaded in this session, in recording order
    pub fn get_lineage(&self, thread_id: &ThreadId) -> Option<ThreadLineage> {
        let indices = self.by_thread.get(thread_id)?;
        Some(ThreadLineage {
            thread_id: thread_id.clone(),
            versions: indices.values().map(|&i| self.versions[i].clone()).collect(),
        })
    }

    pub fn get_version(&self, version_id: &VersionId) -> Option<&VersionedThread> {
        self.by_id.get(version_id).map(|&i| &self.versions[i])
    }

    /// Parent chain from `version_id` back to its root, nearest first
    ///
    /// Stops early at a parent that is only known from disk.
    pub fn ancestry(&self, version_id: &VersionId) -> Vec<&VersionedThread> {
        let mut chain = Vec::new();
        let mut cursor = self.get_version(version_id);
        while let Some(version) = cursor {
            chain.push(version);
            cursor = version
                .parent_version_id
                .as_ref()
                .and_then(|parent| self.get_version(parent));
        }
        chain
    }

    /// Every thread with a version, persisted or recorded here
    pub fn thread_ids(&self) -> impl Iterator<Item = &ThreadId> {
        self.heads.keys()
    }

    /// Versions loaded in this session as forensic snapshot lines
    pub fn snapshot_records(&self) -> Vec<SnapshotRecord> {
        self.versions
            .iter()
            .map(VersionedThread::to_snapshot_record)
            .collect()
    }

    /// Mark the current state so a failed persist can undo later recordings
    pub(crate) fn checkpoint(&self) -> TrackerCheckpoint {
        TrackerCheckpoint {
            len: self.versions.len(),
            heads: self.heads.clone(),
            next_position: self.next_position,
        }
    }

    /// Forget every version recorded after `checkpoint`
    pub(crate) fn rollback(&mut self, checkpoint: TrackerCheckpoint) {
        let len = checkpoint.len;
        for version in self.versions.drain(len..) {
            self.by_id.remove(&version.version_id);
            if let Some(indices) = self.by_thread.get_mut(&version.thread_id) {
                indices.retain(|_, index| *index < len);
                if indices.is_empty() {
                    self.by_thread.remove(&version.thread_id);
                }
            }
        }
        self.heads = checkpoint.heads;
        self.next_position = checkpoint.next_position;
    }

    pub fn versions(&self) -> &[VersionedThread] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
