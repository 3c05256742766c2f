//! replisync-policy — decides the next scaling step.
//!
//! # Decision Algorithm
//!
//! ```text
//! if orchestrator < floor and membership < floor:
//!     ScaleUp toward floor               // regardless of any requested step
//!
//! if orchestrator != membership:         // drift
//!     target = max(orchestrator, floor)
//!     converge membership to target, then the orchestrator
//!
//! else:                                  // steady state
//!     +1 → ScaleUp(n + 1)
//!     -1 → ScaleDown(n - 1) unless n - 1 < floor
//! ```
//!
//! The external trigger for steady-state steps is injected through a
//! [`ScaleSignal`].

pub mod policy;
pub mod signal;

pub use policy::{ScalingAction, ScalingDecision, decide};
pub use signal::{ManualSignal, NoSignal, OscillatingSignal, ScaleSignal};
