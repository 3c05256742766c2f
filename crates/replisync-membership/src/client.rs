//! The membership client seam.

use std::sync::Arc;

use replisync_core::{BoxFuture, ControlResult, GroupStatus, MembershipConfig};

/// Administrative access to the consensus group's configuration.
///
/// Implementations report individual member unreachability as data in
/// [`GroupStatus`], never as an error.
pub trait MembershipClient: Send + Sync {
    /// Fetch the current configuration.
    ///
    /// Fails with `Unavailable`/`Timeout` when the admin interface cannot be
    /// reached and `Malformed` when the response does not parse.
    fn fetch_config(&self) -> BoxFuture<'_, ControlResult<MembershipConfig>>;

    /// Replace the configuration, provided the store is still at
    /// `expected_base_version`. Returns the committed version.
    ///
    /// Fails with `VersionConflict` on a stale base and `QuorumLoss` when the
    /// proposed configuration would leave no reachable majority.
    fn apply_config<'a>(
        &'a self,
        config: &'a MembershipConfig,
        expected_base_version: u64,
    ) -> BoxFuture<'a, ControlResult<u64>>;

    /// Best-effort per-member reachability.
    fn fetch_status(&self) -> BoxFuture<'_, ControlResult<GroupStatus>>;
}

impl<T: MembershipClient + ?Sized> MembershipClient for Arc<T> {
    fn fetch_config(&self) -> BoxFuture<'_, ControlResult<MembershipConfig>> {
        (**self).fetch_config()
    }

    fn apply_config<'a>(
        &'a self,
        config: &'a MembershipConfig,
        expected_base_version: u64,
    ) -> BoxFuture<'a, ControlResult<u64>> {
        (**self).apply_config(config, expected_base_version)
    }

    fn fetch_status(&self) -> BoxFuture<'_, ControlResult<GroupStatus>> {
        (**self).fetch_status()
    }
}
