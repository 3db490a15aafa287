//! Version lineage types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LifecycleState, LogSequence, ThreadId, VersionId};
use crate::utils::to_iso;

/// One recorded version of a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedThread {
    pub thread_id: ThreadId,
    pub version_id: VersionId,
    pub at_sequence: LogSequence,
    pub state_hash: String,
    pub parent_version_id: Option<VersionId>,
    pub created_at: DateTime<Utc>,
    pub fragment_count: usize,
    pub lifecycle_state: LifecycleState,
    pub absence_detected: bool,
}

impl VersionedThread {
    pub fn is_root(&self) -> bool {
        self.parent_version_id.is_none()
    }

    /// Forensic snapshot line for this version
    pub fn to_snapshot_record(&self) -> SnapshotRecord {
        SnapshotRecord {
            version_id: self.version_id.clone(),
            previous_version_id: self.parent_version_id.clone(),
            created_at: to_iso(&self.created_at),
            thread_id: self.thread_id.clone(),
            absence_detected: self.absence_detected,
            lifecycle_state: self.lifecycle_state,
        }
    }
}

/// Versions of one thread in recording order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadLineage {
    pub thread_id: ThreadId,
    pub versions: Vec<VersionedThread>,
}

impl ThreadLineage {
    /// First recorded version
    pub fn root(&self) -> Option<&VersionedThread> {
        self.versions.first()
    }

    /// Most recently recorded version
    pub fn latest(&self) -> Option<&VersionedThread> {
        self.versions.last()
    }

    /// Closest version at or before `sequence`; the later recording wins a tie
    pub fn at_sequence(&self, sequence: LogSequence) -> Option<&VersionedThread> {
        self.versions
            .iter()
            .filter(|v| v.at_sequence <= sequence)
            .fold(None, |best: Option<&VersionedThread>, v| match best {
                Some(b) if b.at_sequence > v.at_sequence => Some(b),
                _ => Some(v),
            })
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// One line of `snapshots.jsonl`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub version_id: VersionId,
    pub previous_version_id: Option<VersionId>,
    pub created_at: String,
    pub thread_id: ThreadId,
    pub absence_detected: bool,
    pub lifecycle_state: LifecycleState,
}

impl SnapshotRecord {
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn version(seq: u64, parent: Option<&str>) -> VersionedThread {
        VersionedThread {
            thread_id: ThreadId::new("thread_a"),
            version_id: VersionId::new(format!("v_{}", seq)),
            at_sequence: LogSequence::new(seq),
            state_hash: format!("hash_{}", seq),
            parent_version_id: parent.map(VersionId::new),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            fragment_count: seq as usize,
            lifecycle_state: LifecycleState::Active,
            absence_detected: false,
        }
    }

    #[test]
    fn test_lineage_at_sequence_never_interpolates() {
        let lineage = ThreadLineage {
            thread_id: ThreadId::new("thread_a"),
            versions: vec![version(2, None), version(5, Some("v_2")), version(9, Some("v_5"))],
        };

        assert!(lineage.at_sequence(LogSequence::new(1)).is_none());
        assert_eq!(lineage.at_sequence(LogSequence::new(2)).unwrap().at_sequence, LogSequence::new(2));
        assert_eq!(lineage.at_sequence(LogSequence::new(7)).unwrap().at_sequence, LogSequence::new(5));
        assert_eq!(lineage.at_sequence(LogSequence::new(100)).unwrap().at_sequence, LogSequence::new(9));
        assert_eq!(lineage.root().unwrap().version_id, VersionId::new("v_2"));
        assert_eq!(lineage.latest().unwrap().version_id, VersionId::new("v_9"));
    }

    #[test]
    fn test_at_sequence_prefers_later_recording() {
        let mut again = version(5, Some("v_5"));
        again.version_id = VersionId::new("v_5b");
        let lineage = ThreadLineage {
            thread_id: ThreadId::new("thread_a"),
            versions: vec![version(5, None), again],
        };
        assert_eq!(lineage.at_sequence(LogSequence::new(5)).unwrap().version_id, VersionId::new("v_5b"));
    }

    #[test]
    fn test_snapshot_record_format() {
        let record = version(3, Some("v_2")).to_snapshot_record();
        let line = record.to_json_line().unwrap();
        assert!(line.contains("\"previous_version_id\":\"v_2\""));
        assert!(line.contains("\"created_at\":\"2024-01-01T00:00:00+00:00\""));
        assert!(line.contains("\"lifecycle_state\":\"active\""));
        assert_eq!(SnapshotRecord::from_json_line(&line).unwrap(), record);

        let root = version(1, None).to_snapshot_record().to_json_line().unwrap();
        assert!(root.contains("\"previous_version_id\":null"));
    }
}
