//! replisync-core — shared building blocks for the replica-set reconciler.
//!
//! - **`types`** — membership configuration, members, observations
//! - **`addressing`** — deterministic `<workload>-<ordinal>.<suffix>:<port>` hosts
//! - **`error`** — the `ControlError` taxonomy and its retry classification
//! - **`retry`** — per-call timeouts, exponential backoff, cooperative cancellation
//! - **`config`** — `replisync.toml` parsing and validation

pub mod addressing;
pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use addressing::HostScheme;
pub use config::ControllerConfig;
pub use error::{ControlError, ControlResult, ErrorKind};
pub use retry::{Backoff, RetryPolicy};
pub use types::*;

/// Boxed, sendable future used at the client trait seams.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
