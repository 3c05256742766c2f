//! In-memory membership store.
//!
//! Enforces the same rules as the real admin interface: optimistic version
//! checks, single-member changes, and a reachable majority in every
//! accepted configuration. Faults and concurrent mutations can be scripted
//! for tests and simulation.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use replisync_core::{
    BoxFuture, ControlError, ControlResult, GroupStatus, HostScheme, Member, MemberId,
    MemberStatus, MembershipConfig,
};

use crate::client::MembershipClient;

/// Operations on the store that faults can be scripted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Fetch,
    Apply,
    Status,
}

/// An out-of-band membership edit scripted by a test or simulation.
type ExternalChange = Box<dyn FnOnce(&mut Vec<Member>) + Send>;

struct Inner {
    config: MembershipConfig,
    unreachable: BTreeSet<MemberId>,
    primary_available: bool,
    faults: HashMap<StoreOp, VecDeque<ControlError>>,
    /// Bump the version out of band right before the next apply is checked.
    bump_on_next_apply: bool,
    /// Commit the next valid apply but report this error to the caller.
    commit_then_fail: Option<ControlError>,
    /// Another writer's change, committed right after our next commit.
    after_commit: Option<ExternalChange>,
    /// Another writer's change, committed when the countdown of
    /// `fetch_config` calls reaches zero.
    on_fetch: Option<(u32, ExternalChange)>,
    apply_calls: u64,
    versions: Vec<u64>,
}

/// Shared, cloneable in-memory store.
#[derive(Clone)]
pub struct InMemoryMembershipStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryMembershipStore {
    pub fn new(config: MembershipConfig) -> Self {
        let versions = vec![config.version];
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config,
                unreachable: BTreeSet::new(),
                primary_available: true,
                faults: HashMap::new(),
                bump_on_next_apply: false,
                commit_then_fail: None,
                after_commit: None,
                on_fetch: None,
                apply_calls: 0,
                versions,
            })),
        }
    }

    /// A group of `count` members with ordinals `0..count` at version 1.
    pub fn bootstrap(group_id: &str, scheme: &HostScheme, count: u32) -> Self {
        let members = (0..u64::from(count))
            .map(|ordinal| Member::new(ordinal, scheme.host_for(ordinal)))
            .collect();
        Self::new(MembershipConfig::new(group_id, 1, members))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("membership store lock")
    }

    /// Current configuration.
    pub fn config(&self) -> MembershipConfig {
        self.lock().config.clone()
    }

    pub fn version(&self) -> u64 {
        self.lock().config.version
    }

    pub fn member_count(&self) -> u32 {
        self.lock().config.len() as u32
    }

    /// Every version the store has held, in order.
    pub fn version_history(&self) -> Vec<u64> {
        self.lock().versions.clone()
    }

    /// Number of apply calls received, accepted or not.
    pub fn apply_calls(&self) -> u64 {
        self.lock().apply_calls
    }

    /// Mark a member id reachable or unreachable.
    pub fn set_reachable(&self, id: MemberId, reachable: bool) {
        let mut inner = self.lock();
        if reachable {
            inner.unreachable.remove(&id);
        } else {
            inner.unreachable.insert(id);
        }
    }

    pub fn set_primary_available(&self, available: bool) {
        self.lock().primary_available = available;
    }

    /// Fail the next call of `op` with `err`. Faults queue per operation.
    pub fn fail_next(&self, op: StoreOp, err: ControlError) {
        self.lock().faults.entry(op).or_default().push_back(err);
    }

    /// Simulate another writer committing between our fetch and apply.
    pub fn bump_on_next_apply(&self) {
        self.lock().bump_on_next_apply = true;
    }

    /// Commit the next valid apply but report `err`, as when a response
    /// is lost after the store committed.
    pub fn commit_then_fail_next_apply(&self, err: ControlError) {
        self.lock().commit_then_fail = Some(err);
    }

    /// Apply an out-of-band change, bumping the version by one.
    pub fn mutate_externally(&self, f: impl FnOnce(&mut Vec<Member>)) {
        Self::external_locked(&mut self.lock(), f);
    }

    /// Have another writer commit `f` immediately after the next committed
    /// apply, before the caller can observe the store again.
    pub fn mutate_after_next_commit(&self, f: impl FnOnce(&mut Vec<Member>) + Send + 'static) {
        self.lock().after_commit = Some(Box::new(f));
    }

    /// Have another writer commit `f` just before the `nth` upcoming
    /// `fetch_config` call (1 is the next one) reads the store.
    pub fn mutate_on_fetch(&self, nth: u32, f: impl FnOnce(&mut Vec<Member>) + Send + 'static) {
        self.lock().on_fetch = Some((nth.max(1), Box::new(f)));
    }

    fn external_locked(inner: &mut Inner, f: impl FnOnce(&mut Vec<Member>)) {
        f(&mut inner.config.members);
        inner.config.version += 1;
        let version = inner.config.version;
        inner.versions.push(version);
        info!(version, "external membership change");
    }

    fn take_fault(inner: &mut Inner, op: StoreOp) -> Option<ControlError> {
        inner.faults.get_mut(&op).and_then(|q| q.pop_front())
    }

    fn apply_locked(
        inner: &mut Inner,
        proposed: &MembershipConfig,
        expected_base_version: u64,
    ) -> ControlResult<u64> {
        inner.apply_calls += 1;

        if let Some(err) = Self::take_fault(inner, StoreOp::Apply) {
            return Err(err);
        }

        if std::mem::take(&mut inner.bump_on_next_apply) {
            inner.config.version += 1;
            let version = inner.config.version;
            inner.versions.push(version);
            debug!(version, "concurrent writer bumped version");
        }

        let current = &inner.config;
        if expected_base_version != current.version {
            return Err(ControlError::VersionConflict {
                expected: expected_base_version,
                actual: current.version,
            });
        }
        if proposed.id != current.id {
            return Err(ControlError::Rejected {
                status: 400,
                message: format!("group id {} does not match {}", proposed.id, current.id),
            });
        }
        if proposed.version != current.version + 1 {
            return Err(ControlError::Rejected {
                status: 400,
                message: format!(
                    "proposed version {} must be {}",
                    proposed.version,
                    current.version + 1
                ),
            });
        }
        proposed.validate()?;

        let before: BTreeSet<_> = current.members.iter().map(|m| m.id).collect();
        let after: BTreeSet<_> = proposed.members.iter().map(|m| m.id).collect();
        if before.symmetric_difference(&after).count() > 1 {
            return Err(ControlError::Rejected {
                status: 400,
                message: "only one member may be added or removed per reconfiguration".into(),
            });
        }

        let reachable = proposed
            .members
            .iter()
            .filter(|m| !inner.unreachable.contains(&m.id))
            .count();
        if proposed.members.is_empty() || reachable * 2 <= proposed.members.len() {
            return Err(ControlError::QuorumLoss(format!(
                "{reachable} of {} proposed members reachable",
                proposed.members.len()
            )));
        }

        inner.config = proposed.clone();
        inner.versions.push(proposed.version);
        debug!(version = proposed.version, members = proposed.len(), "reconfiguration committed");
        if let Some(f) = inner.after_commit.take() {
            Self::external_locked(inner, f);
        }

        match inner.commit_then_fail.take() {
            Some(err) => Err(err),
            None => Ok(proposed.version),
        }
    }

    fn status_locked(inner: &Inner) -> GroupStatus {
        let primary = if inner.primary_available {
            inner
                .config
                .members
                .iter()
                .map(|m| m.id)
                .find(|id| !inner.unreachable.contains(id))
        } else {
            None
        };

        let members = inner
            .config
            .members
            .iter()
            .map(|m| {
                let reachable = !inner.unreachable.contains(&m.id);
                let state = match (reachable, Some(m.id) == primary) {
                    (false, _) => "(not reachable/healthy)",
                    (true, true) => "PRIMARY",
                    (true, false) => "SECONDARY",
                };
                MemberStatus {
                    id: m.id,
                    host: m.host.clone(),
                    reachable,
                    state: state.to_string(),
                }
            })
            .collect();

        GroupStatus { members, primary }
    }
}

impl MembershipClient for InMemoryMembershipStore {
    fn fetch_config(&self) -> BoxFuture<'_, ControlResult<MembershipConfig>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if let Some((remaining, f)) = inner.on_fetch.take() {
                if remaining <= 1 {
                    Self::external_locked(&mut inner, f);
                } else {
                    inner.on_fetch = Some((remaining - 1, f));
                }
            }
            if let Some(err) = Self::take_fault(&mut inner, StoreOp::Fetch) {
                return Err(err);
            }
            Ok(inner.config.clone())
        })
    }

    fn apply_config<'a>(
        &'a self,
        config: &'a MembershipConfig,
        expected_base_version: u64,
    ) -> BoxFuture<'a, ControlResult<u64>> {
        Box::pin(async move {
            let mut inner = self.lock();
            Self::apply_locked(&mut inner, config, expected_base_version)
        })
    }

    fn fetch_status(&self) -> BoxFuture<'_, ControlResult<GroupStatus>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if let Some(err) = Self::take_fault(&mut inner, StoreOp::Status) {
                return Err(err);
            }
            Ok(Self::status_locked(&inner))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme() -> HostScheme {
        HostScheme::new("mongo", "mongo.default.svc.cluster.local", 27017)
    }

    fn store() -> InMemoryMembershipStore {
        InMemoryMembershipStore::bootstrap("rs0", &scheme(), 3)
    }

    #[test]
    fn bootstrap_assigns_dense_ordinals() {
        let cfg = store().config();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.len(), 3);
        assert_eq!(cfg.members[2].host, scheme().host_for(2));
    }

    #[tokio::test]
    async fn apply_with_current_base_commits() {
        let s = store();
        let cfg = s.fetch_config().await.unwrap();
        let next = cfg.with_member(Member::new(3, scheme().host_for(3)));

        assert_eq!(s.apply_config(&next, cfg.version).await, Ok(2));
        assert_eq!(s.member_count(), 4);
        assert_eq!(s.version_history(), vec![1, 2]);
    }

    #[tokio::test]
    async fn stale_base_never_mutates() {
        let s = store();
        let cfg = s.fetch_config().await.unwrap();
        let next = cfg.with_member(Member::new(3, scheme().host_for(3)));
        s.apply_config(&next, cfg.version).await.unwrap();

        // Replaying the same apply against the old base.
        let before = s.config();
        let err = s.apply_config(&next, cfg.version).await.unwrap_err();
        assert_eq!(err, ControlError::VersionConflict { expected: 1, actual: 2 });
        assert_eq!(s.config(), before);
    }

    #[tokio::test]
    async fn version_must_advance_by_one() {
        let s = store();
        let cfg = s.fetch_config().await.unwrap();
        let mut next = cfg.with_member(Member::new(3, scheme().host_for(3)));
        next.version += 1;

        let err = s.apply_config(&next, cfg.version).await.unwrap_err();
        assert!(matches!(err, ControlError::Rejected { status: 400, .. }));
        assert_eq!(s.version(), 1);
    }

    #[tokio::test]
    async fn rejects_multi_member_changes() {
        let s = store();
        let cfg = s.fetch_config().await.unwrap();
        let mut next = cfg
            .with_member(Member::new(3, "a:1"))
            .with_member(Member::new(4, "b:1"));
        next.version = cfg.version + 1;

        assert!(matches!(
            s.apply_config(&next, cfg.version).await,
            Err(ControlError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn quorum_loss_when_majority_unreachable() {
        let s = store();
        s.set_reachable(0, false);
        s.set_reachable(1, false);
        let cfg = s.fetch_config().await.unwrap();
        let next = cfg.without_member(2);

        assert!(matches!(
            s.apply_config(&next, cfg.version).await,
            Err(ControlError::QuorumLoss(_))
        ));
        assert_eq!(s.member_count(), 3);
    }

    #[tokio::test]
    async fn bump_on_next_apply_causes_conflict() {
        let s = store();
        let cfg = s.fetch_config().await.unwrap();
        s.bump_on_next_apply();

        let next = cfg.with_member(Member::new(3, scheme().host_for(3)));
        assert_eq!(
            s.apply_config(&next, cfg.version).await,
            Err(ControlError::VersionConflict { expected: 1, actual: 2 })
        );
        assert_eq!(s.member_count(), 3);
    }

    #[tokio::test]
    async fn scripted_faults_fire_once() {
        let s = store();
        s.fail_next(StoreOp::Fetch, ControlError::Unavailable("down".into()));

        assert!(s.fetch_config().await.is_err());
        assert!(s.fetch_config().await.is_ok());
    }

    #[tokio::test]
    async fn status_reports_unreachable_members() {
        let s = store();
        s.set_reachable(0, false);

        let status = s.fetch_status().await.unwrap();
        assert_eq!(status.reachable_members(), BTreeSet::from([1, 2]));
        assert_eq!(status.primary, Some(1));
        assert_eq!(status.members[0].state, "(not reachable/healthy)");

        s.set_primary_available(false);
        assert!(!s.fetch_status().await.unwrap().has_primary());
    }

    #[tokio::test]
    async fn writer_after_commit_lands_before_next_read() {
        let s = store();
        let cfg = s.fetch_config().await.unwrap();
        s.mutate_after_next_commit(|_| {});

        let next = cfg.with_member(Member::new(3, scheme().host_for(3)));
        assert_eq!(s.apply_config(&next, cfg.version).await, Ok(2));
        assert_eq!(s.version_history(), vec![1, 2, 3]);
        assert_eq!(s.member_count(), 4);
    }

    #[tokio::test]
    async fn writer_on_fetch_waits_for_its_turn() {
        let s = store();
        s.mutate_on_fetch(2, |members| members.push(Member::new(3, scheme().host_for(3))));

        assert_eq!(s.fetch_config().await.unwrap().len(), 3);
        let cfg = s.fetch_config().await.unwrap();
        assert_eq!(cfg.len(), 4);
        assert_eq!(cfg.version, 2);
        assert_eq!(s.fetch_config().await.unwrap().version, 2);
    }

    #[test]
    fn external_mutation_bumps_version() {
        let s = store();
        s.mutate_externally(|members| members.retain(|m| m.id != 2));
        assert_eq!(s.version(), 2);
        assert_eq!(s.member_count(), 2);
    }
}
