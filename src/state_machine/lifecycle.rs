//! Lifecycle classification
//!
//! Purely time-threshold driven. Precedence, first match wins:
//!
//! 1. closed by a split                    -> Terminated
//! 2. silence > termination threshold      -> Terminated
//! 3. silence > dormancy threshold         -> Dormant
//! 4. split at its latest activity         -> Diverged
//! 5. below the minimum size (not branch)  -> Emerging
//! 6. otherwise                            -> Active

use chrono::Duration;

use super::StateMachineConfig;
use crate::types::LifecycleState;

/// Facts about a thread that decide its lifecycle
#[derive(Debug, Clone, Copy)]
pub struct LifecycleInput {
    pub fragment_count: usize,
    /// `reference_time - last_activity`; negative when activity lies ahead
    pub silence: Duration,
    pub closed: bool,
    /// Split happened and nothing has joined since
    pub awaiting_activity_after_split: bool,
    pub is_branch: bool,
}

pub fn classify(config: &StateMachineConfig, input: &LifecycleInput) -> LifecycleState {
    if input.closed || input.silence > config.termination() {
        LifecycleState::Terminated
    } else if input.silence > config.dormancy() {
        LifecycleState::Dormant
    } else if input.awaiting_activity_after_split {
        LifecycleState::Diverged
    } else if !input.is_branch && input.fragment_count < config.min_active_fragments {
        LifecycleState::Emerging
    } else {
        LifecycleState::Active
    }
}
