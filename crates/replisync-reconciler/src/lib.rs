//! replisync-reconciler — the control loop.
//!
//! # State Machine
//!
//! ```text
//!                 counts differ
//!   SYNCHRONIZED ──────────────► DRIFT ──(one member per tick)──┐
//!     │    ▲  ▲                    │                            │
//!  +1 │    │  └────────────────────┴──── counts equal ◄─────────┘
//!     ▼    │ ok
//!   SCALING_UP     set_declared(n+1) → await_addressable → add_member
//!   SCALING_DOWN   remove_member → set_declared(n-1)
//!     │
//!     │ terminal error (quorum loss, exhausted retries, …)
//!     ▼
//!   FAILED ── no calls until an operator Reset ──► fresh observation
//! ```
//!
//! One tick runs to completion before the next starts. Shutdown is checked
//! between ticks and at every backoff wait; an apply already sent is
//! allowed to finish.

pub mod reconciler;
pub mod state;

pub use reconciler::{Reconciler, ReconcilerSettings};
pub use state::{Command, ReconcilerState, ReconcilerStatus};
