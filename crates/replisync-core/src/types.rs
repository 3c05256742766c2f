//! Domain types for the replica-set reconciler.
//!
//! `MembershipConfig` mirrors the consensus group's configuration document.
//! `ObservedState` is recomputed once per tick and never persisted.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

/// Identifier of a member within a consensus group.
pub type MemberId = u64;

// ── Membership ─────────────────────────────────────────────────────

/// A single voting member of the consensus group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    #[serde(alias = "_id")]
    pub id: MemberId,
    /// `host:port` of the member, derived from its ordinal.
    pub host: String,
}

impl Member {
    pub fn new(id: MemberId, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
        }
    }
}

/// The group's membership configuration.
///
/// `version` is bumped by exactly one on every accepted reconfiguration.
/// Member order is insertion order and encodes historical ordinal assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MembershipConfig {
    /// Group identifier (e.g. the replica set name).
    #[serde(alias = "_id")]
    pub id: String,
    pub version: u64,
    pub members: Vec<Member>,
}

impl MembershipConfig {
    pub fn new(id: impl Into<String>, version: u64, members: Vec<Member>) -> Self {
        Self {
            id: id.into(),
            version,
            members,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Id for the next member: one past the highest id in use.
    ///
    /// Never fills gaps left by earlier removals.
    pub fn next_member_id(&self) -> MemberId {
        self.members
            .iter()
            .map(|m| m.id)
            .max()
            .map_or(0, |max| max + 1)
    }

    /// The most recently provisioned member (highest id).
    pub fn highest_member(&self) -> Option<&Member> {
        self.members.iter().max_by_key(|m| m.id)
    }

    pub fn contains(&self, id: MemberId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    pub fn get(&self, id: MemberId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Successor configuration with `member` appended.
    pub fn with_member(&self, member: Member) -> Self {
        let mut members = self.members.clone();
        members.push(member);
        Self {
            id: self.id.clone(),
            version: self.version + 1,
            members,
        }
    }

    /// Successor configuration with member `id` removed.
    pub fn without_member(&self, id: MemberId) -> Self {
        Self {
            id: self.id.clone(),
            version: self.version + 1,
            members: self
                .members
                .iter()
                .filter(|m| m.id != id)
                .cloned()
                .collect(),
        }
    }

    /// Reject configurations that reuse a member id.
    pub fn validate(&self) -> ControlResult<()> {
        let mut seen = BTreeSet::new();
        for member in &self.members {
            if !seen.insert(member.id) {
                return Err(ControlError::Malformed {
                    reason: format!("duplicate member id {}", member.id),
                    payload: serde_json::to_string(self).unwrap_or_default(),
                });
            }
        }
        Ok(())
    }
}

// ── Status ─────────────────────────────────────────────────────────

/// Per-member health as reported by the data store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberStatus {
    #[serde(alias = "_id")]
    pub id: MemberId,
    pub host: String,
    pub reachable: bool,
    /// Free-form replication state, e.g. "PRIMARY", "SECONDARY", "STARTUP2".
    #[serde(default)]
    pub state: String,
}

/// Best-effort group health snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupStatus {
    pub members: Vec<MemberStatus>,
    /// Id of the member currently accepting writes, if any.
    #[serde(default)]
    pub primary: Option<MemberId>,
}

impl GroupStatus {
    pub fn reachable_members(&self) -> BTreeSet<MemberId> {
        self.members
            .iter()
            .filter(|m| m.reachable)
            .map(|m| m.id)
            .collect()
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }
}

// ── Observation ────────────────────────────────────────────────────

/// Snapshot of both replica counts taken once per tick.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedState {
    /// Declared scale of the orchestrated workload.
    pub orchestrator_replicas: u32,
    /// Member count of the latest fetched `MembershipConfig`.
    pub membership_replicas: u32,
}

impl ObservedState {
    pub fn new(orchestrator_replicas: u32, membership_replicas: u32) -> Self {
        Self {
            orchestrator_replicas,
            membership_replicas,
        }
    }

    pub fn in_sync(&self) -> bool {
        self.orchestrator_replicas == self.membership_replicas
    }
}
