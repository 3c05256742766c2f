//! replisync-membership — the data store side of reconciliation.
//!
//! # Architecture
//!
//! ```text
//! MembershipProtocol
//!   ├── add_member(id)  fetch → id still next? → append → apply(base version)
//!   ├── remove_member() fetch → floor check → drop highest id → apply(base version)
//!   └── dyn MembershipClient
//!       ├── HttpAdminClient        (admin API over HTTP/JSON)
//!       └── InMemoryMembershipStore (tests, simulation)
//! ```
//!
//! Every apply carries the version it was computed from. The store rejects
//! stale bases with `VersionConflict`; the protocol then re-fetches and
//! recomputes rather than resubmitting the same configuration.

pub mod client;
pub mod http;
pub mod memory;
pub mod protocol;

pub use client::MembershipClient;
pub use http::HttpAdminClient;
pub use memory::{InMemoryMembershipStore, StoreOp};
pub use protocol::{ChangeKind, MembershipChange, MembershipProtocol};
