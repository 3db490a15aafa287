//! Offline version DAG rebuilt from snapshot records
//!
//! Used by verification tooling that only has `snapshots.jsonl`. Records must
//! appear in recording order: every parent precedes its children.

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::types::{SnapshotRecord, VersionId};

#[derive(Debug, Clone, Default)]
pub struct VersionDag {
    records: Vec<SnapshotRecord>,
    index: HashMap<VersionId, usize>,
    children: HashMap<VersionId, Vec<usize>>,
}

impl VersionDag {
    /// Build the DAG, halting on the first duplicate, forward or dangling link
    ///
    /// Errors carry the 1-based position of the offending record.
    pub fn from_records(records: &[SnapshotRecord]) -> CoreResult<Self> {
        let mut dag = Self::default();

        for (i, record) in records.iter().enumerate() {
            let position = i as u64 + 1;
            if dag.index.contains_key(&record.version_id) {
                return Err(CoreError::structural(
                    position,
                    format!("duplicate version {}", record.version_id),
                ));
            }

            if let Some(parent) = &record.previous_version_id {
                if !dag.index.contains_key(parent) {
                    let later = records[i + 1..].iter().any(|r| &r.version_id == parent);
                    let reason = if later || parent == &record.version_id {
                        format!("version {} points forward to {}", record.version_id, parent)
                    } else {
                        format!("version {} has unknown parent {}", record.version_id, parent)
                    };
                    return Err(CoreError::structural(position, reason));
                }
                dag.children.entry(parent.clone()).or_default().push(i);
            }

            dag.index.insert(record.version_id.clone(), i);
            dag.records.push(record.clone());
        }

        Ok(dag)
    }

    pub fn record(&self, version_id: &VersionId) -> Option<&SnapshotRecord> {
        self.index.get(version_id).map(|&i| &self.records[i])
    }

    /// Versions without a parent
    pub fn roots(&self) -> Vec<&SnapshotRecord> {
        self.records
            .iter()
            .filter(|r| r.previous_version_id.is_none())
            .collect()
    }

    /// Versions without children
    pub fn heads(&self) -> Vec<&SnapshotRecord> {
        self.records
            .iter()
            .filter(|r| !self.children.contains_key(&r.version_id))
            .collect()
    }

    pub fn children(&self, version_id: &VersionId) -> Vec<&SnapshotRecord> {
        self.children
            .get(version_id)
            .map(|indices| indices.iter().map(|&i| &self.records[i]).collect())
            .unwrap_or_default()
    }

    /// Path from the root down to `version_id`
    pub fn lineage_of(&self, version_id: &VersionId) -> Vec<&SnapshotRecord> {
        let mut path = Vec::new();
        let mut cursor = self.record(version_id);
        while let Some(record) = cursor {
            path.push(record);
            cursor = record
                .previous_version_id
                .as_ref()
                .and_then(|parent| self.record(parent));
        }
        path.reverse();
        path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
