//! replisync-orchestrator — the workload side of reconciliation.
//!
//! ```text
//! ┌──────────────┐  declared_replicas()      ┌────────────────────────┐
//! │  Reconciler  │  set_declared_replicas(n) │  OrchestratorClient    │
//! │              │ ────────────────────────► │  ├─ KubeScaleClient    │
//! │              │  await_addressable(ord)   │  └─ InMemoryOrchestr.  │
//! └──────────────┘                           └───────────┬────────────┘
//!                                                        │ tcp_probe
//!                                                        ▼
//!                                         <workload>-<ord>.<suffix>:<port>
//! ```

pub mod client;
pub mod kube;
pub mod memory;
pub mod probe;

pub use client::{OrchestratorClient, await_addressable};
pub use kube::KubeScaleClient;
pub use memory::{InMemoryOrchestrator, OrchestratorOp};
pub use probe::tcp_probe;
