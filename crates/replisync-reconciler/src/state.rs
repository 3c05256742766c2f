//! Reconciler state, published status, and operator commands.

use serde::{Deserialize, Serialize};

use replisync_core::ObservedState;
use replisync_policy::ScalingDecision;

/// Reconciler state. `Failed` is sticky until an operator reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcilerState {
    Synchronized,
    Drift,
    ScalingUp,
    ScalingDown,
    Failed { reason: String },
}

impl ReconcilerState {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// State implied by an observation alone.
    pub fn from_observation(observed: &ObservedState) -> Self {
        if observed.in_sync() {
            Self::Synchronized
        } else {
            Self::Drift
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Synchronized => "SYNCHRONIZED",
            Self::Drift => "DRIFT",
            Self::ScalingUp => "SCALING_UP",
            Self::ScalingDown => "SCALING_DOWN",
            Self::Failed { .. } => "FAILED",
        }
    }
}

impl std::fmt::Display for ReconcilerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "FAILED ({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Snapshot published after every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerStatus {
    #[serde(flatten)]
    pub state: ReconcilerState,
    pub observed: Option<ObservedState>,
    pub decision: Option<ScalingDecision>,
    /// Membership version at the last observation or commit.
    pub membership_version: Option<u64>,
    pub last_error: Option<String>,
    pub ticks: u64,
    /// Accepted membership applies.
    pub applies: u64,
    /// Version conflicts absorbed by the mutation protocols.
    pub conflicts: u64,
    /// Entries into `FAILED`.
    pub failures: u64,
}

impl Default for ReconcilerStatus {
    fn default() -> Self {
        Self {
            state: ReconcilerState::Synchronized,
            observed: None,
            decision: None,
            membership_version: None,
            last_error: None,
            ticks: 0,
            applies: 0,
            conflicts: 0,
            failures: 0,
        }
    }
}

/// Operator commands, consumed by the run loop between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Leave `FAILED` for the state implied by a fresh observation.
    Reset,
    /// Queue a scaling request with the configured signal.
    Scale(i32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_with_tag() {
        let json = serde_json::to_value(ReconcilerState::ScalingUp).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "SCALING_UP" }));

        let json = serde_json::to_value(ReconcilerState::Failed {
            reason: "quorum loss".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "state": "FAILED", "reason": "quorum loss" })
        );
    }

    #[test]
    fn status_flattens_state() {
        let status = ReconcilerStatus {
            observed: Some(ObservedState::new(4, 3)),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "SYNCHRONIZED");
        assert_eq!(json["observed"]["orchestrator_replicas"], 4);
    }

    #[test]
    fn observation_implies_state() {
        assert_eq!(
            ReconcilerState::from_observation(&ObservedState::new(3, 3)),
            ReconcilerState::Synchronized
        );
        assert_eq!(
            ReconcilerState::from_observation(&ObservedState::new(5, 3)),
            ReconcilerState::Drift
        );
    }
}
