//! Scaling policy — a pure decision over one tick's observation.
//!
//! `decide` never fails and has no side effects. Callers validate the
//! observed counts before calling it; unsigned inputs rule out negatives.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Direction of the next membership mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScalingAction {
    None,
    ScaleUp,
    ScaleDown,
}

/// Outcome of a policy evaluation. Derived each tick, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub action: ScalingAction,
    pub target_orchestrator_replicas: u32,
    pub target_membership_replicas: u32,
}

impl ScalingDecision {
    fn none(current: u32) -> Self {
        Self {
            action: ScalingAction::None,
            target_orchestrator_replicas: current,
            target_membership_replicas: current,
        }
    }

    fn toward(action: ScalingAction, target: u32) -> Self {
        Self {
            action,
            target_orchestrator_replicas: target,
            target_membership_replicas: target,
        }
    }
}

/// Decide the next step given both replica counts, the floor, and the
/// externally requested step (`+1`, `-1`, or `0`).
///
/// Drift always wins over a requested step: while the counts disagree the
/// requested step is ignored and membership is converged toward the
/// orchestrator count, never below `floor`.
pub fn decide(
    orchestrator_replicas: u32,
    membership_replicas: u32,
    floor: u32,
    desired_delta: i32,
) -> ScalingDecision {
    // Both below floor: grow back to it whatever was requested.
    if orchestrator_replicas < floor && membership_replicas < floor {
        debug!(
            orchestrator = orchestrator_replicas,
            membership = membership_replicas,
            floor,
            "both counts below floor, scaling up"
        );
        return ScalingDecision::toward(ScalingAction::ScaleUp, floor);
    }

    if orchestrator_replicas != membership_replicas {
        let target = orchestrator_replicas.max(floor);
        let action = if membership_replicas < target {
            ScalingAction::ScaleUp
        } else if membership_replicas > target {
            ScalingAction::ScaleDown
        } else {
            // Membership already sits at the floor; raise the orchestrator.
            ScalingAction::ScaleUp
        };
        debug!(
            orchestrator = orchestrator_replicas,
            membership = membership_replicas,
            target,
            ?action,
            "drift detected"
        );
        return ScalingDecision::toward(action, target);
    }

    let current = membership_replicas;
    match desired_delta.signum() {
        1 => ScalingDecision::toward(ScalingAction::ScaleUp, current.saturating_add(1)),
        -1 if current > floor => ScalingDecision::toward(ScalingAction::ScaleDown, current - 1),
        -1 => {
            debug!(current, floor, "scale-down request blocked by floor");
            ScalingDecision::none(current)
        }
        _ => ScalingDecision::none(current),
    }
}
