//! Add-member and remove-member protocols.
//!
//! Both follow the same optimistic loop:
//!
//! ```text
//! for attempt in 1..=max_attempts:
//!     cfg  = fetch_config()                 (transient errors retried in place)
//!     next = plan(cfg)                      (version = cfg.version + 1)
//!     apply_config(next, cfg.version)
//!         ok              → done
//!         conflict        → back off, re-fetch, re-plan
//!         transient       → back off, re-fetch; if the store has moved past
//!                           base and shows our change, it committed → done
//!         anything else   → abort, surface the error
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use replisync_core::retry::{self, is_shutdown, sleep_or_shutdown};
use replisync_core::{
    ControlError, ControlResult, ErrorKind, GroupStatus, HostScheme, Member, MemberId,
    MembershipConfig, RetryPolicy,
};

use crate::client::MembershipClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
}

/// A committed single-member reconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipChange {
    pub kind: ChangeKind,
    pub member: Member,
    /// Version committed by the store.
    pub version: u64,
    /// Member count after the change.
    pub members: u32,
    /// Version conflicts absorbed on the way.
    pub conflicts: u32,
}

/// A planned mutation: the member it touches and the successor config.
struct Plan {
    member: Member,
    next: MembershipConfig,
}

/// Drives versioned reconfigurations through a [`MembershipClient`].
#[derive(Clone)]
pub struct MembershipProtocol {
    client: Arc<dyn MembershipClient>,
    retry: RetryPolicy,
}

impl MembershipProtocol {
    pub fn new(client: Arc<dyn MembershipClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Fetch the configuration, retrying transient failures.
    pub async fn fetch_config(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> ControlResult<MembershipConfig> {
        retry::call(&self.retry, "fetch_config", shutdown, || self.client.fetch_config()).await
    }

    /// Fetch group health, retrying transient failures.
    pub async fn fetch_status(&self, shutdown: &watch::Receiver<bool>) -> ControlResult<GroupStatus> {
        retry::call(&self.retry, "fetch_status", shutdown, || self.client.fetch_status()).await
    }

    /// Append member `id` with a host derived from it.
    ///
    /// `id` must still be `max(ids) + 1` in the fetched configuration. If
    /// another writer moved membership since the caller chose it, this
    /// fails with [`ControlError::StaleOrdinal`] without writing.
    pub async fn add_member(
        &self,
        id: MemberId,
        scheme: &HostScheme,
        shutdown: &watch::Receiver<bool>,
    ) -> ControlResult<MembershipChange> {
        self.mutate(
            ChangeKind::Added,
            shutdown,
            |cfg| {
                let next = cfg.next_member_id();
                if next != id {
                    return Err(ControlError::StaleOrdinal { expected: id, next });
                }
                let member = Member::new(id, scheme.host_for(id));
                Ok(Plan {
                    next: cfg.with_member(member.clone()),
                    member,
                })
            },
            |cfg, member| cfg.get(member.id) == Some(member),
        )
        .await
    }

    /// Remove the highest-id member, refusing to go to or below `floor`.
    pub async fn remove_member(
        &self,
        floor: u32,
        shutdown: &watch::Receiver<bool>,
    ) -> ControlResult<MembershipChange> {
        self.mutate(
            ChangeKind::Removed,
            shutdown,
            |cfg| {
                let members = cfg.len() as u32;
                if members <= floor {
                    return Err(ControlError::FloorViolation { members, floor });
                }
                let member = cfg
                    .highest_member()
                    .cloned()
                    .ok_or(ControlError::FloorViolation { members, floor })?;
                Ok(Plan {
                    next: cfg.without_member(member.id),
                    member,
                })
            },
            |cfg, member| !cfg.contains(member.id),
        )
        .await
    }

    async fn mutate<P, C>(
        &self,
        kind: ChangeKind,
        shutdown: &watch::Receiver<bool>,
        plan: P,
        committed: C,
    ) -> ControlResult<MembershipChange>
    where
        P: Fn(&MembershipConfig) -> ControlResult<Plan>,
        C: Fn(&MembershipConfig, &Member) -> bool,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut backoff = self.retry.backoff();
        let mut conflicts = 0;
        // Base version and member of an apply whose outcome is unknown.
        let mut in_doubt: Option<(u64, Member)> = None;

        for attempt in 1..=max_attempts {
            let cfg = self.fetch_config(shutdown).await?;

            if let Some((base, member)) = in_doubt.take() {
                if cfg.version > base && committed(&cfg, &member) {
                    info!(
                        ?kind,
                        member_id = member.id,
                        version = cfg.version,
                        "earlier apply had committed"
                    );
                    return Ok(MembershipChange {
                        kind,
                        member,
                        version: cfg.version,
                        members: cfg.len() as u32,
                        conflicts,
                    });
                }
            }

            let Plan { member, next } = plan(&cfg)?;

            // Nothing has been written yet; stop here rather than start a write.
            if is_shutdown(shutdown) {
                return Err(ControlError::Cancelled);
            }

            debug!(
                ?kind,
                member_id = member.id,
                host = %member.host,
                base_version = cfg.version,
                attempt,
                "applying membership change"
            );

            let err = match retry::attempt(
                "apply_config",
                self.retry.call_timeout,
                self.client.apply_config(&next, cfg.version),
            )
            .await
            {
                Ok(version) => {
                    info!(
                        ?kind,
                        member_id = member.id,
                        host = %member.host,
                        version,
                        members = next.len(),
                        "membership change committed"
                    );
                    return Ok(MembershipChange {
                        kind,
                        member,
                        version,
                        members: next.len() as u32,
                        conflicts,
                    });
                }
                Err(e) => e,
            };

            match err.kind() {
                ErrorKind::Conflict => {
                    conflicts += 1;
                    warn!(?kind, attempt, error = %err, "version conflict, re-observing");
                }
                ErrorKind::Transient => {
                    warn!(?kind, attempt, error = %err, "apply outcome unknown, re-observing");
                    in_doubt = Some((cfg.version, member));
                }
                _ => return Err(err),
            }

            if attempt == max_attempts {
                return Err(ControlError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            if !sleep_or_shutdown(backoff.next_delay(), shutdown).await {
                return Err(ControlError::Cancelled);
            }
        }

        unreachable!("mutation loop returns on its final attempt")
    }
}
