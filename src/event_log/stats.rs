//! Log store statistics
//!
//! Provides:
//! - Entry, fragment and snapshot counts
//! - File sizes
//! - Hydration throughput

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::{Duration, Instant};

use super::{LogStore, LogStoreConfig};
use crate::error::CoreResult;
use crate::types::{LogEntryRecord, LogSequence};

/// Statistics about the on-disk store
#[derive(Debug, Clone, Default)]
pub struct LogStoreStats {
    /// Lines in log_entries.jsonl
    pub entry_count: usize,
    /// Lines in fragments.jsonl
    pub fragment_count: usize,
    /// Lines in snapshots.jsonl
    pub snapshot_count: usize,
    /// Size of log_entries.jsonl in bytes
    pub log_size: u64,
    /// Size of fragments.jsonl in bytes
    pub fragments_size: u64,
    /// Size of snapshots.jsonl in bytes
    pub snapshots_size: u64,
    /// Sequence of the last record
    pub head_sequence: LogSequence,
    /// Entry hash of the last record
    pub head_hash: String,
}

impl LogStoreStats {
    pub fn total_size(&self) -> u64 {
        self.log_size + self.fragments_size + self.snapshots_size
    }

    /// Format size in human-readable format
    pub fn format_size(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

/// Collector for store statistics
pub struct StatsCollector {
    config: LogStoreConfig,
}

impl StatsCollector {
    pub fn new(config: LogStoreConfig) -> Self {
        Self { config }
    }

    pub fn collect(&self) -> CoreResult<LogStoreStats> {
        let mut stats = LogStoreStats::default();

        let log_path = self.config.log_entries_path();
        let (entry_count, log_size, last_line) = scan_lines(&log_path)?;
        stats.entry_count = entry_count;
        stats.log_size = log_size;
        if let Some(line) = last_line {
            let record = LogEntryRecord::from_json_line(&line)?;
            stats.head_sequence = record.sequence;
            stats.head_hash = record.entry_hash;
        }

        let (fragment_count, fragments_size, _) = scan_lines(&self.config.fragments_path())?;
        stats.fragment_count = fragment_count;
        stats.fragments_size = fragments_size;

        let (snapshot_count, snapshots_size, _) = scan_lines(&self.config.snapshots_path())?;
        stats.snapshot_count = snapshot_count;
        stats.snapshots_size = snapshots_size;

        Ok(stats)
    }

    /// Time full verified hydration of the store
    pub fn benchmark_hydration(&self, iterations: usize) -> CoreResult<HydrationBenchmark> {
        if iterations == 0 {
            return Ok(HydrationBenchmark::default());
        }

        let store = LogStore::new(self.config.clone());
        let mut total_duration = Duration::ZERO;
        let mut entries_per_iteration = 0;

        for _ in 0..iterations {
            let start = Instant::now();
            let log = store.hydrate()?;
            total_duration += start.elapsed();
            entries_per_iteration = log.len();
        }

        let avg_duration = total_duration / iterations as u32;
        let entries_per_second = if avg_duration.as_secs_f64() > 0.0 {
            entries_per_iteration as f64 / avg_duration.as_secs_f64()
        } else {
            0.0
        };

        Ok(HydrationBenchmark {
            iterations,
            entries_per_iteration,
            avg_duration_ms: avg_duration.as_millis() as u64,
            entries_per_second,
        })
    }
}

/// Non-blank line count, byte size and last non-blank line of a file
fn scan_lines(path: &Path) -> CoreResult<(usize, u64, Option<String>)> {
    if !path.exists() {
        return Ok((0, 0, None));
    }

    let size = fs::metadata(path)?.len();
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    let mut last = None;
    for line_result in reader.lines() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        count += 1;
        last = Some(line);
    }
    Ok((count, size, last))
}

/// Hydration benchmark results
#[derive(Debug, Clone, Default)]
pub struct HydrationBenchmark {
    /// Number of iterations run
    pub iterations: usize,
    /// Entries loaded per iteration
    pub entries_per_iteration: usize,
    /// Average duration in milliseconds
    pub avg_duration_ms: u64,
    /// Entries verified per second
    pub entries_per_second: f64,
}
