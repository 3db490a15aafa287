//! Point-in-time derivation cache
//!
//! Entries are only valid for one log head. The first lookup after the head
//! moves drops everything.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{DerivedState, LogSequence};

#[derive(Debug, Clone, Default)]
pub(crate) struct DerivationCache {
    head_hash: String,
    states: HashMap<(LogSequence, DateTime<Utc>), DerivedState>,
}

impl DerivationCache {
    pub fn get(
        &mut self,
        head_hash: &str,
        until: LogSequence,
        reference_time: DateTime<Utc>,
    ) -> Option<&DerivedState> {
        if self.head_hash != head_hash {
            self.invalidate(head_hash);
            return None;
        }
        self.states.get(&(until, reference_time))
    }

    pub fn insert(&mut self, head_hash: &str, state: DerivedState) {
        if self.head_hash != head_hash {
            self.invalidate(head_hash);
        }
        self.states
            .insert((state.at_sequence, state.reference_time), state);
    }

    pub fn invalidate(&mut self, head_hash: &str) {
        self.head_hash = head_hash.to_string();
        self.states.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.states.len()
    }
}
