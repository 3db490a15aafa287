//! Engine configuration
//!
//! Environment:
//! - NARRATIVE_LEDGER_DATA_DIR: directory for the JSONL store (default `data`)
//! - NARRATIVE_LEDGER_TOPIC_OVERLAP_MIN: minimum topic overlap ratio (default 0.6)
//! - NARRATIVE_LEDGER_TEMPORAL_ADJACENCY_HOURS: matching window (default 840)
//! - NARRATIVE_LEDGER_MIN_ACTIVE_FRAGMENTS: size at which a thread stops emerging (default 2)
//! - NARRATIVE_LEDGER_DORMANCY_HOURS: silence before dormancy (default 168)
//! - NARRATIVE_LEDGER_TERMINATION_HOURS: silence before termination (default 840)
//! - NARRATIVE_LEDGER_MAX_REWIND_HOURS: late-arrival horizon (default 168)
//!
//! Unset variables keep their defaults. A set but unparsable value is an
//! error, never silently ignored.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::event_log::LogStoreConfig;
use crate::replay::ReplayConfig;
use crate::state_machine::StateMachineConfig;

/// Prefix shared by every environment variable read here
pub const ENV_PREFIX: &str = "NARRATIVE_LEDGER_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub state_machine: StateMachineConfig,
    pub replay: ReplayConfig,
    pub store: LogStoreConfig,
}

impl EngineConfig {
    /// Defaults overlaid with `NARRATIVE_LEDGER_*` variables
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = Self::default();

        if let Some(dir) = get("DATA_DIR") {
            config.store.data_dir = PathBuf::from(dir);
        }

        let machine = &mut config.state_machine;
        overlay(&get, "TOPIC_OVERLAP_MIN", &mut machine.topic_overlap_min)?;
        overlay(&get, "TEMPORAL_ADJACENCY_HOURS", &mut machine.temporal_adjacency_hours)?;
        overlay(&get, "MIN_ACTIVE_FRAGMENTS", &mut machine.min_active_fragments)?;
        overlay(&get, "DORMANCY_HOURS", &mut machine.dormancy_hours)?;
        overlay(&get, "TERMINATION_HOURS", &mut machine.termination_hours)?;
        overlay(&get, "MAX_REWIND_HOURS", &mut config.replay.max_rewind_hours)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.state_machine.validate()?;
        self.replay.validate()
    }
}

fn overlay<G, T>(get: &G, name: &str, slot: &mut T) -> CoreResult<()>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = get(name) {
        *slot = raw.trim().parse().map_err(|e: T::Err| {
            CoreError::InvalidConfig(format!("{}{} = {:?}: {}", ENV_PREFIX, name, raw, e))
        })?;
    }
    Ok(())
}
