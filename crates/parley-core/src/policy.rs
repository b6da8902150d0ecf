//! Turn policies: whether a collaboration continues, and the emergency limits
//! that end it regardless.

use std::time::Duration;

use crate::config::RouterConfig;
use crate::session::{CollaborationMode, CollaborationSession};

/// Outcome of the continuation policy for one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Continue,
    Stop(StopReason),
}

/// Why a bounded collaboration stopped on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    AgentFinal,
    MaxRoundsReached,
    NoHandoff,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AgentFinal => write!(f, "Agent indicated completion"),
            Self::MaxRoundsReached => write!(f, "Maximum rounds reached"),
            Self::NoHandoff => write!(f, "No handoff provided in bounded mode"),
        }
    }
}

/// Decide whether another turn should be taken.
///
/// Bounded sessions need a handoff, no final flag and remaining round budget.
/// Unbounded sessions always continue; the final flag is ignored there.
pub fn continuation(
    mode: CollaborationMode,
    has_handoff: bool,
    is_final: bool,
    round: u32,
    max_rounds: u32,
) -> Continuation {
    match mode {
        CollaborationMode::Unbounded => Continuation::Continue,
        CollaborationMode::Bounded => {
            if is_final {
                Continuation::Stop(StopReason::AgentFinal)
            } else if round >= max_rounds {
                Continuation::Stop(StopReason::MaxRoundsReached)
            } else if !has_handoff {
                Continuation::Stop(StopReason::NoHandoff)
            } else {
                Continuation::Continue
            }
        }
    }
}

/// Check the hard limits. Returns the reason to force-end the session, if any.
pub fn emergency_reason(
    session: &CollaborationSession,
    elapsed: Duration,
    config: &RouterConfig,
) -> Option<String> {
    if session.round >= config.max_rounds_emergency {
        return Some(format!(
            "Emergency stop: {} turns reached",
            config.max_rounds_emergency
        ));
    }
    if elapsed >= config.max_elapsed() {
        return Some(format!(
            "Emergency stop: {} minutes elapsed",
            config.max_elapsed_minutes
        ));
    }
    if session.total_tokens >= config.max_tokens_emergency {
        return Some(format!(
            "Emergency stop: {} tokens reached",
            config.max_tokens_emergency
        ));
    }
    None
}

/// Whether this round should carry the long-running advisory
pub fn should_warn(round: u32, interval: u32) -> bool {
    interval > 0 && round % interval == 0
}
