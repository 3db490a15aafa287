//! Forensic JSONL store
//!
//! The on-disk form of the log, readable by external verification tooling:
//!
//! ```text
//! data/
//! ├── log_entries.jsonl   {sequence, fragment_id, ingestion_timestamp, previous_hash, entry_hash}
//! ├── fragments.jsonl     one full fragment per line
//! ├── snapshots.jsonl     {version_id, previous_version_id, created_at, thread_id, ...}
//! └── clock_ticks.json    recorded clock ticks
//! ```
//!
//! Lines are only ever appended, each append is fsynced. Hydration goes
//! through `EventLog::load_verified_entry` and halts on the first bad line.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::EventLog;
use crate::error::{CoreError, CoreResult};
use crate::types::{Fragment, FragmentId, LogEntry, LogEntryRecord, LogSequence, LogState, SnapshotRecord};
use crate::utils::cleanup_temp_files;

/// Location of the store's files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogStoreConfig {
    /// Path to the data directory
    pub data_dir: PathBuf,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl LogStoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path to log_entries.jsonl
    pub fn log_entries_path(&self) -> PathBuf {
        self.data_dir.join("log_entries.jsonl")
    }

    /// Path to fragments.jsonl
    pub fn fragments_path(&self) -> PathBuf {
        self.data_dir.join("fragments.jsonl")
    }

    /// Path to snapshots.jsonl
    pub fn snapshots_path(&self) -> PathBuf {
        self.data_dir.join("snapshots.jsonl")
    }

    /// Path to clock_ticks.json
    pub fn clock_ticks_path(&self) -> PathBuf {
        self.data_dir.join("clock_ticks.json")
    }
}

/// Append-only file persistence for the log and version snapshots
#[derive(Debug, Clone)]
pub struct LogStore {
    config: LogStoreConfig,
}

impl LogStore {
    pub fn new(config: LogStoreConfig) -> Self {
        Self { config }
    }

    /// Create the data directory and clear leftovers from interrupted writes
    pub fn open(config: LogStoreConfig) -> CoreResult<Self> {
        fs::create_dir_all(config.data_dir())?;
        let cleaned = cleanup_temp_files(config.data_dir())?;
        if cleaned > 0 {
            warn!(cleaned, "Removed temp files left by an interrupted write");
        }
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &LogStoreConfig {
        &self.config
    }

    /// Persist one freshly appended entry
    ///
    /// The fragment line is written first so a crash in between leaves an
    /// unreferenced fragment, never an entry without its fragment.
    pub fn persist_entry(&self, entry: &LogEntry) -> CoreResult<()> {
        let fragment_line = serde_json::to_string(entry.fragment())?;
        append_lines(&self.config.fragments_path(), [fragment_line])?;

        let record_line = entry.to_record().to_json_line()?;
        append_lines(&self.config.log_entries_path(), [record_line])?;

        debug!(sequence = entry.sequence().value(), "Persisted log entry");
        Ok(())
    }

    pub fn load_records(&self) -> CoreResult<Vec<LogEntryRecord>> {
        read_jsonl(&self.config.log_entries_path(), LogEntryRecord::from_json_line)
    }

    /// Fragments by id
    ///
    /// A retried append after a failed entry write leaves an identical
    /// fragment line behind; identical repeats are folded, differing ones
    /// are an error.
    pub fn load_fragments(&self) -> CoreResult<HashMap<FragmentId, Fragment>> {
        let fragments: Vec<Fragment> =
            read_jsonl(&self.config.fragments_path(), |line| serde_json::from_str(line))?;

        let mut by_id: HashMap<FragmentId, Fragment> = HashMap::with_capacity(fragments.len());
        for fragment in fragments {
            match by_id.get(&fragment.fragment_id) {
                Some(stored) if *stored != fragment => {
                    return Err(CoreError::structural(
                        0,
                        format!(
                            "fragment {} stored twice with different content in fragments.jsonl",
                            fragment.fragment_id
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    by_id.insert(fragment.fragment_id.clone(), fragment);
                }
            }
        }
        Ok(by_id)
    }

    /// Rebuild the log, verifying every entry on the way in
    pub fn hydrate(&self) -> CoreResult<EventLog> {
        let records = self.load_records()?;
        let mut fragments = self.load_fragments()?;
        let mut log = EventLog::new();

        for record in records {
            let sequence = record.sequence;
            let fragment = fragments.remove(&record.fragment_id).ok_or_else(|| {
                CoreError::structural(
                    sequence.value(),
                    format!("fragment {} missing from fragments.jsonl", record.fragment_id),
                )
            })?;
            let entry = record.into_entry(fragment)?;
            log.load_verified_entry(entry)?;
        }

        let state = log.state();
        info!(
            entries = state.entry_count,
            head_sequence = state.head_sequence.value(),
            "Hydrated event log"
        );
        Ok(log)
    }

    /// Verify the on-disk chain without building a log
    ///
    /// Entry hashes only cover record fields, so fragments are not read.
    pub fn verify_files(&self) -> CoreResult<LogState> {
        let mut state = LogState::default();

        for record in self.load_records()? {
            let expected = state.head_sequence.next();
            if record.sequence != expected {
                return Err(CoreError::structural(
                    record.sequence.value(),
                    format!("expected sequence {}, found {}", expected, record.sequence),
                ));
            }
            if record.previous_hash != state.head_hash {
                return Err(CoreError::structural(
                    record.sequence.value(),
                    "previous hash does not match predecessor entry hash",
                ));
            }
            let computed = record.recompute_hash()?;
            if computed != record.entry_hash {
                return Err(CoreError::CorruptEntry {
                    sequence: record.sequence.value(),
                    expected: record.entry_hash,
                    computed,
                });
            }
            state = LogState {
                head_sequence: record.sequence,
                head_hash: record.entry_hash,
                entry_count: state.entry_count + 1,
            };
        }

        Ok(state)
    }

    pub fn append_snapshots(&self, records: &[SnapshotRecord]) -> CoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let lines = records
            .iter()
            .map(SnapshotRecord::to_json_line)
            .collect::<Result<Vec<_>, _>>()?;
        append_lines(&self.config.snapshots_path(), lines)
    }

    pub fn load_snapshots(&self) -> CoreResult<Vec<SnapshotRecord>> {
        read_jsonl(&self.config.snapshots_path(), SnapshotRecord::from_json_line)
    }

    /// Head sequence recorded on disk, without verification
    pub fn last_sequence(&self) -> CoreResult<LogSequence> {
        Ok(self
            .load_records()?
            .last()
            .map(|r| r.sequence)
            .unwrap_or(LogSequence::ZERO))
    }
}

/// Append `lines` to `path` and fsync
fn append_lines<I>(path: &Path, lines: I) -> CoreResult<()>
where
    I: IntoIterator<Item = String>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    file.sync_all()?;
    Ok(())
}

/// Parse every non-blank line; the first bad line fails the whole read
pub(crate) fn read_jsonl<T, F>(path: &Path, parse: F) -> CoreResult<Vec<T>>
where
    F: Fn(&str) -> Result<T, serde_json::Error>,
{
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut items = Vec::new();
    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        let item = parse(&line).map_err(|source| CoreError::MalformedRecord {
            path: path.to_path_buf(),
            line: line_num + 1,
            source,
        })?;
        items.push(item);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::LogicalClock;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn create_test_store() -> (LogStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LogStore::open(LogStoreConfig::new(temp_dir.path().join("data"))).unwrap();
        (store, temp_dir)
    }

    fn write_entries(store: &LogStore, ids: &[&str]) -> EventLog {
        let mut clock = LogicalClock::replay(
            (0..ids.len() as i64)
                .map(|i| t0() + Duration::hours(i) + Duration::microseconds(7))
                .collect(),
        );
        let mut log = EventLog::new();
        for id in ids {
            let fragment = Fragment::new(*id, format!("hash_{}", id), t0(), t0()).with_topics(["topic"]);
            let entry = log.append(fragment, &mut clock).unwrap();
            store.persist_entry(&entry).unwrap();
        }
        log
    }

    #[test]
    fn test_persist_and_hydrate() {
        let (store, _temp) = create_test_store();
        let log = write_entries(&store, &["a", "b", "c"]);

        let hydrated = store.hydrate().unwrap();
        assert_eq!(hydrated.state(), log.state());
        assert_eq!(hydrated.entries(), log.entries());
        assert_eq!(store.verify_files().unwrap(), log.state());
        assert_eq!(store.last_sequence().unwrap(), LogSequence::new(3));
    }

    #[test]
    fn test_hydrate_empty_store() {
        let (store, _temp) = create_test_store();
        let log = store.hydrate().unwrap();
        assert!(log.is_empty());
        assert_eq!(store.verify_files().unwrap(), LogState::default());
    }

    #[test]
    fn test_hydrate_halts_on_tampered_record() {
        let (store, _temp) = create_test_store();
        write_entries(&store, &["a", "b", "c"]);

        let path = store.config().log_entries_path();
        let content = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = content.lines().map(String::from).collect();
        let mut record = LogEntryRecord::from_json_line(&lines[1]).unwrap();
        record.ingestion_timestamp = "2030-01-01T00:00:00+00:00".to_string();
        lines[1] = record.to_json_line().unwrap();
        fs::write(&path, lines.join("\n") + "\n").unwrap();

        match store.hydrate() {
            Err(CoreError::CorruptEntry { sequence, .. }) => assert_eq!(sequence, 2),
            other => panic!("expected CorruptEntry, got {:?}", other),
        }
        assert_eq!(store.verify_files().unwrap_err().code(), "CORRUPT_ENTRY");
    }

    #[test]
    fn test_hydrate_halts_on_removed_record() {
        let (store, _temp) = create_test_store();
        write_entries(&store, &["a", "b", "c"]);

        let path = store.config().log_entries_path();
        let content = fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = content.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        fs::write(&path, kept.join("\n") + "\n").unwrap();

        match store.hydrate() {
            Err(CoreError::StructuralInconsistency { sequence, .. }) => assert_eq!(sequence, 3),
            other => panic!("expected StructuralInconsistency, got {:?}", other),
        }
    }

    #[test]
    fn test_hydrate_halts_on_missing_fragment() {
        let (store, _temp) = create_test_store();
        write_entries(&store, &["a", "b"]);
        fs::write(store.config().fragments_path(), "").unwrap();

        let err = store.hydrate().unwrap_err();
        assert_eq!(err.code(), "STRUCTURAL_INCONSISTENCY");
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_repeated_fragment_lines() {
        let (store, _temp) = create_test_store();
        write_entries(&store, &["a"]);
        let path = store.config().fragments_path();
        let line = fs::read_to_string(&path).unwrap();

        // Identical line left by a retried append is folded
        fs::write(&path, format!("{}{}", line, line)).unwrap();
        assert_eq!(store.load_fragments().unwrap().len(), 1);
        assert_eq!(store.hydrate().unwrap().len(), 1);

        let altered = line.replace("hash_a", "hash_x");
        fs::write(&path, format!("{}{}", line, altered)).unwrap();
        let err = store.load_fragments().unwrap_err();
        assert!(err.to_string().contains("different content"));
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let (store, _temp) = create_test_store();
        write_entries(&store, &["a"]);

        let mut file = OpenOptions::new()
            .append(true)
            .open(store.config().log_entries_path())
            .unwrap();
        writeln!(file, "{{not json").unwrap();

        match store.hydrate() {
            Err(CoreError::MalformedRecord { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected MalformedRecord, got {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_lines_roundtrip() {
        use crate::types::{LifecycleState, ThreadId, VersionId};

        let (store, _temp) = create_test_store();
        let records = vec![
            SnapshotRecord {
                version_id: VersionId::new("v_1"),
                previous_version_id: None,
                created_at: "2024-01-01T00:00:00+00:00".to_string(),
                thread_id: ThreadId::new("thread_a"),
                absence_detected: false,
                lifecycle_state: LifecycleState::Emerging,
            },
            SnapshotRecord {
                version_id: VersionId::new("v_2"),
                previous_version_id: Some(VersionId::new("v_1")),
                created_at: "2024-01-02T00:00:00+00:00".to_string(),
                thread_id: ThreadId::new("thread_a"),
                absence_detected: true,
                lifecycle_state: LifecycleState::Active,
            },
        ];

        store.append_snapshots(&records[..1]).unwrap();
        store.append_snapshots(&records[1..]).unwrap();
        store.append_snapshots(&[]).unwrap();

        assert_eq!(store.load_snapshots().unwrap(), records);
    }
}
