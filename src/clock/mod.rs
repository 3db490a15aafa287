//! Logical clock
//!
//! The only time source the core reads. Two modes:
//!
//! ```text
//! live:    now() -> wall clock (µs precision) -> recorded into tick log
//! replay:  now() -> next recorded tick        -> ClockExhausted when none left
//! ```
//!
//! Identical tick sequences give identical ingestion timestamps, identical
//! entry hashes and identical derived state. Replay never falls back to real
//! time.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::utils::{atomic_write_with, parse_iso, to_iso, truncate_to_micros};

/// Tick log format version
pub const TICK_LOG_VERSION: &str = "1.0";

/// Injectable source of "now"
pub trait Clock {
    /// Next timestamp; replay clocks fail once their ticks run out
    fn now(&mut self) -> CoreResult<DateTime<Utc>>;
}

/// Clock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    Live,
    Replay,
}

/// Position of the clock after its latest tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSnapshot {
    pub timestamp: DateTime<Utc>,
    pub tick_index: usize,
    pub is_live: bool,
}

/// Persisted tick sequence (`clock_ticks.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickLog {
    pub version: String,
    pub mode: ClockMode,
    pub tick_count: usize,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub ticks: Vec<String>,
}

/// Recording or replaying clock
#[derive(Debug, Clone)]
pub struct LogicalClock {
    mode: ClockMode,
    ticks: Vec<DateTime<Utc>>,
    /// Number of ticks handed out so far
    cursor: usize,
}

impl LogicalClock {
    /// Clock that reads wall time and records every tick
    pub fn live() -> Self {
        Self {
            mode: ClockMode::Live,
            ticks: Vec::new(),
            cursor: 0,
        }
    }

    /// Clock that hands out `ticks` in order, then fails
    pub fn replay(ticks: Vec<DateTime<Utc>>) -> Self {
        Self {
            mode: ClockMode::Replay,
            ticks,
            cursor: 0,
        }
    }

    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    pub fn is_live(&self) -> bool {
        self.mode == ClockMode::Live
    }

    /// Ticks handed out so far
    pub fn tick_count(&self) -> usize {
        self.cursor
    }

    /// Ticks a replay clock can still hand out
    pub fn remaining(&self) -> usize {
        self.ticks.len() - self.cursor
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.ticks.first().copied()
    }

    /// Every recorded (live) or loaded (replay) tick
    pub fn ticks(&self) -> &[DateTime<Utc>] {
        &self.ticks
    }

    pub fn snapshot(&self) -> Option<ClockSnapshot> {
        let index = self.cursor.checked_sub(1)?;
        Some(ClockSnapshot {
            timestamp: self.ticks[index],
            tick_index: index,
            is_live: self.is_live(),
        })
    }

    /// Replay clock over the ticks handed out so far, rewound to the start
    pub fn into_replay(self) -> Self {
        let mut ticks = self.ticks;
        ticks.truncate(self.cursor);
        Self::replay(ticks)
    }

    pub fn to_tick_log(&self) -> TickLog {
        let handed_out = &self.ticks[..self.cursor];
        TickLog {
            version: TICK_LOG_VERSION.to_string(),
            mode: self.mode,
            tick_count: handed_out.len(),
            start_time: handed_out.first().map(to_iso),
            end_time: handed_out.last().map(to_iso),
            ticks: handed_out.iter().map(to_iso).collect(),
        }
    }

    /// Atomically write the ticks handed out so far
    pub fn save_log<P: AsRef<Path>>(&self, path: P) -> CoreResult<()> {
        let log = self.to_tick_log();
        atomic_write_with(path.as_ref(), |file| {
            serde_json::to_writer_pretty(&mut *file, &log)?;
            Ok(())
        })?;
        info!(
            path = %path.as_ref().display(),
            ticks = log.tick_count,
            "Saved clock tick log"
        );
        Ok(())
    }

    /// Replay clock from a saved tick log
    pub fn from_log<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let log: TickLog = serde_json::from_str(&content)?;
        Self::from_tick_log(&log)
    }

    pub fn from_tick_log(log: &TickLog) -> CoreResult<Self> {
        if log.tick_count != log.ticks.len() {
            return Err(CoreError::InvalidConfig(format!(
                "tick log declares {} ticks but holds {}",
                log.tick_count,
                log.ticks.len()
            )));
        }
        let ticks = log
            .ticks
            .iter()
            .map(|tick| {
                parse_iso(tick)
                    .map_err(|e| CoreError::InvalidConfig(format!("bad tick {:?}: {}", tick, e)))
            })
            .collect::<CoreResult<Vec<_>>>()?;
        debug!(ticks = ticks.len(), "Loaded clock tick log");
        Ok(Self::replay(ticks))
    }
}

impl Clock for LogicalClock {
    fn now(&mut self) -> CoreResult<DateTime<Utc>> {
        match self.mode {
            ClockMode::Live => {
                let tick = truncate_to_micros(Utc::now());
                self.ticks.push(tick);
                self.cursor = self.ticks.len();
                Ok(tick)
            }
            ClockMode::Replay => {
                let tick = self
                    .ticks
                    .get(self.cursor)
                    .copied()
                    .ok_or(CoreError::ClockExhausted {
                        index: self.cursor,
                        recorded: self.ticks.len(),
                    })?;
                self.cursor += 1;
                Ok(tick)
            }
        }
    }
}
