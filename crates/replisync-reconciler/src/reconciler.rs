//! Reconciler — drives the state machine one tick at a time.
//!
//! A tick observes both replica counts, asks the policy for a decision,
//! and executes at most one membership mutation. Every outcome is folded
//! back into a [`ReconcilerStatus`] and published on a watch channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use replisync_core::config::ConfigError;
use replisync_core::retry::{self, is_shutdown, sleep_or_shutdown};
use replisync_core::{
    ControlError, ControlResult, ControllerConfig, ErrorKind, HostScheme, MembershipConfig,
    ObservedState, RetryPolicy,
};
use replisync_membership::{MembershipChange, MembershipProtocol};
use replisync_orchestrator::{OrchestratorClient, await_addressable};
use replisync_policy::{ScaleSignal, ScalingAction, ScalingDecision, decide};

use crate::state::{Command, ReconcilerState, ReconcilerStatus};

/// While failed, every this many ticks log at warn instead of debug.
const FAILED_WARN_EVERY: u64 = 10;

/// Tunables the reconciler needs from configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub floor: u32,
    pub scheme: HostScheme,
    pub retry: RetryPolicy,
    pub addressable_timeout: Duration,
    pub addressable_poll: Duration,
    /// Upper bound on the startup wait for a writable primary.
    pub primary_wait: Duration,
}

impl ReconcilerSettings {
    pub fn from_config(config: &ControllerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            floor: config.group.floor,
            scheme: config.host_scheme(),
            retry: config.reconcile.retry_policy()?,
            addressable_timeout: config.reconcile.addressable_timeout()?,
            addressable_poll: config.reconcile.addressable_poll()?,
            primary_wait: config.reconcile.primary_wait()?,
        })
    }
}

pub struct Reconciler {
    orchestrator: Arc<dyn OrchestratorClient>,
    membership: MembershipProtocol,
    signal: Arc<dyn ScaleSignal>,
    settings: ReconcilerSettings,
    status: ReconcilerStatus,
    status_tx: watch::Sender<ReconcilerStatus>,
    shutdown: watch::Receiver<bool>,
    /// Ticks spent in `FAILED` since the last failure.
    failed_ticks: u64,
}

impl Reconciler {
    pub fn new(
        orchestrator: Arc<dyn OrchestratorClient>,
        membership: MembershipProtocol,
        signal: Arc<dyn ScaleSignal>,
        settings: ReconcilerSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let status = ReconcilerStatus::default();
        let (status_tx, _) = watch::channel(status.clone());
        Self {
            orchestrator,
            membership,
            signal,
            settings,
            status,
            status_tx,
            shutdown,
            failed_ticks: 0,
        }
    }

    /// Receiver for the status published after every tick.
    pub fn subscribe(&self) -> watch::Receiver<ReconcilerStatus> {
        self.status_tx.subscribe()
    }

    pub fn state(&self) -> &ReconcilerState {
        &self.status.state
    }

    pub fn status(&self) -> &ReconcilerStatus {
        &self.status
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status.clone());
    }

    fn transition(&mut self, next: ReconcilerState) {
        if self.status.state != next {
            info!(from = %self.status.state, to = %next, "reconciler state change");
            self.status.state = next;
        }
    }

    fn fail(&mut self, err: &ControlError) {
        if let ControlError::Malformed { reason, payload } = err {
            error!(%reason, %payload, "reconciliation failed on malformed response");
        } else {
            error!(error = %err, "reconciliation failed");
        }
        self.status.failures += 1;
        self.failed_ticks = 0;
        self.status.last_error = Some(err.to_string());
        self.transition(ReconcilerState::Failed {
            reason: err.to_string(),
        });
    }

    /// Wait for the group to report a writable primary, bounded by
    /// `primary_wait`. Returns `Ok(false)` if none appeared in time.
    pub async fn wait_for_primary(&self) -> ControlResult<bool> {
        let wait = self.settings.primary_wait;
        let poll = self.settings.addressable_poll;
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            if is_shutdown(&self.shutdown) {
                return Err(ControlError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, self.membership.fetch_status(&self.shutdown)).await {
                Ok(Ok(status)) if status.has_primary() => {
                    info!(primary = ?status.primary, "group has a writable primary");
                    return Ok(true);
                }
                Ok(Ok(_)) => debug!("no writable primary yet"),
                Ok(Err(ControlError::Cancelled)) => return Err(ControlError::Cancelled),
                Ok(Err(e)) => debug!(error = %e, "group status unavailable"),
                Err(_) => {}
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!(wait_ms = wait.as_millis() as u64, "no writable primary, starting anyway");
                return Ok(false);
            }
            if !sleep_or_shutdown(poll.min(deadline - now), &self.shutdown).await {
                return Err(ControlError::Cancelled);
            }
        }
    }

    async fn observe(&self) -> ControlResult<(ObservedState, MembershipConfig)> {
        let orchestrator_replicas = retry::call(
            &self.settings.retry,
            "declared_replicas",
            &self.shutdown,
            || self.orchestrator.declared_replicas(),
        )
        .await?;
        let config = self.membership.fetch_config(&self.shutdown).await?;
        let observed = ObservedState::new(orchestrator_replicas, config.len() as u32);
        Ok((observed, config))
    }

    /// Determine the initial state from one observation.
    pub async fn start(&mut self) -> ControlResult<ReconcilerState> {
        let (observed, config) = self.observe().await?;
        self.status.observed = Some(observed);
        self.status.membership_version = Some(config.version);
        self.status.state = ReconcilerState::from_observation(&observed);
        info!(
            state = %self.status.state,
            orchestrator = observed.orchestrator_replicas,
            membership = observed.membership_replicas,
            version = config.version,
            floor = self.settings.floor,
            "reconciler started"
        );
        self.publish();
        Ok(self.status.state.clone())
    }

    /// Leave `FAILED` for the state implied by a fresh observation.
    /// A no-op in any other state.
    pub async fn reset(&mut self) -> ControlResult<ReconcilerState> {
        if !self.status.state.is_failed() {
            debug!(state = %self.status.state, "reset ignored, not failed");
            return Ok(self.status.state.clone());
        }

        let (observed, config) = self.observe().await?;
        self.status.observed = Some(observed);
        self.status.membership_version = Some(config.version);
        self.status.last_error = None;
        info!(
            orchestrator = observed.orchestrator_replicas,
            membership = observed.membership_replicas,
            "operator reset"
        );
        self.transition(ReconcilerState::from_observation(&observed));
        self.publish();
        Ok(self.status.state.clone())
    }

    /// Run one reconciliation tick and return the resulting state.
    pub async fn tick(&mut self) -> ReconcilerState {
        self.status.ticks += 1;
        let state = self.tick_inner().await;
        self.publish();
        state
    }

    async fn tick_inner(&mut self) -> ReconcilerState {
        if self.status.state.is_failed() {
            self.failed_ticks += 1;
            if self.failed_ticks % FAILED_WARN_EVERY == 0 {
                warn!(
                    state = %self.status.state,
                    ticks = self.failed_ticks,
                    "still failed, awaiting reset"
                );
            } else {
                debug!(state = %self.status.state, "failed, awaiting reset");
            }
            return self.status.state.clone();
        }
        if is_shutdown(&self.shutdown) {
            return self.status.state.clone();
        }

        let (observed, config) = match self.observe().await {
            Ok(o) => o,
            Err(ControlError::Cancelled) => return self.status.state.clone(),
            Err(e) => {
                // Nothing was mutated; the next tick observes again.
                warn!(error = %e, "observation failed");
                self.status.last_error = Some(e.to_string());
                return self.status.state.clone();
            }
        };
        self.status.observed = Some(observed);
        self.status.membership_version = Some(config.version);
        self.transition(ReconcilerState::from_observation(&observed));

        let floor = self.settings.floor;
        let both_below_floor =
            observed.orchestrator_replicas < floor && observed.membership_replicas < floor;
        let requested = if observed.in_sync() && !both_below_floor {
            self.signal.next_step()
        } else {
            0
        };

        let decision = decide(
            observed.orchestrator_replicas,
            observed.membership_replicas,
            floor,
            requested,
        );
        self.status.decision = Some(decision);
        if requested < 0 && decision.action == ScalingAction::None {
            info!(
                membership = observed.membership_replicas,
                floor, "scale-down request dropped at floor"
            );
        }

        if decision.action == ScalingAction::None {
            return self.status.state.clone();
        }
        if observed.in_sync() {
            self.transition(match decision.action {
                ScalingAction::ScaleDown => ReconcilerState::ScalingDown,
                _ => ReconcilerState::ScalingUp,
            });
        }

        match self.execute(observed, &config, decision).await {
            Ok(after) => {
                self.status.observed = Some(after);
                self.status.last_error = None;
                self.transition(ReconcilerState::from_observation(&after));
            }
            Err(ControlError::Cancelled) => {
                info!(state = %self.status.state, "tick interrupted by shutdown");
            }
            Err(e) if e.kind() == ErrorKind::Stale => {
                info!(error = %e, "observation went stale, re-observing next tick");
                self.status.last_error = Some(e.to_string());
                self.transition(ReconcilerState::from_observation(&observed));
            }
            Err(e) if e.kind() == ErrorKind::Policy => {
                warn!(error = %e, "mutation skipped");
                self.status.last_error = Some(e.to_string());
                self.transition(ReconcilerState::from_observation(&observed));
            }
            Err(e) => self.fail(&e),
        }
        self.status.state.clone()
    }

    /// Carry out one step of `decision`, returning the counts it leaves.
    async fn execute(
        &mut self,
        observed: ObservedState,
        config: &MembershipConfig,
        decision: ScalingDecision,
    ) -> ControlResult<ObservedState> {
        match decision.action {
            ScalingAction::None => Ok(observed),
            ScalingAction::ScaleUp if observed.membership_replicas < decision.target_membership_replicas => {
                self.grow(observed, config).await
            }
            ScalingAction::ScaleUp => {
                // Membership is already where it should be; only the
                // orchestrator lags behind.
                let target = decision.target_orchestrator_replicas;
                self.set_declared(target).await?;
                Ok(ObservedState::new(target, observed.membership_replicas))
            }
            ScalingAction::ScaleDown => self.shrink(observed).await,
        }
    }

    /// Orchestrator first, then membership.
    async fn grow(
        &mut self,
        observed: ObservedState,
        config: &MembershipConfig,
    ) -> ControlResult<ObservedState> {
        let wanted = observed.membership_replicas + 1;
        let mut declared = observed.orchestrator_replicas;
        if declared < wanted {
            self.set_declared(wanted).await?;
            declared = wanted;
        }

        let ordinal = config.next_member_id();
        let addressable = await_addressable(
            self.orchestrator.as_ref(),
            ordinal,
            self.settings.addressable_timeout,
            self.settings.addressable_poll,
            &self.shutdown,
        )
        .await?;
        if !addressable {
            return Err(ControlError::NotAddressable(ordinal));
        }

        let change = self
            .membership
            .add_member(ordinal, &self.settings.scheme, &self.shutdown)
            .await?;
        self.record(&change);
        Ok(ObservedState::new(declared, change.members))
    }

    /// Membership first, then the orchestrator.
    async fn shrink(&mut self, observed: ObservedState) -> ControlResult<ObservedState> {
        let change = self
            .membership
            .remove_member(self.settings.floor, &self.shutdown)
            .await?;
        self.record(&change);

        let mut declared = observed.orchestrator_replicas;
        if declared > change.members {
            self.set_declared(change.members).await?;
            declared = change.members;
        }
        Ok(ObservedState::new(declared, change.members))
    }

    async fn set_declared(&self, replicas: u32) -> ControlResult<()> {
        retry::call(
            &self.settings.retry,
            "set_declared_replicas",
            &self.shutdown,
            || self.orchestrator.set_declared_replicas(replicas),
        )
        .await
    }

    fn record(&mut self, change: &MembershipChange) {
        self.status.applies += 1;
        self.status.conflicts += u64::from(change.conflicts);
        self.status.membership_version = Some(change.version);
        info!(
            kind = ?change.kind,
            member_id = change.member.id,
            host = %change.member.host,
            version = change.version,
            members = change.members,
            "membership updated"
        );
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Reset => {
                if let Err(e) = self.reset().await {
                    warn!(error = %e, "reset failed, staying failed");
                    self.status.last_error = Some(e.to_string());
                    self.publish();
                }
            }
            Command::Scale(delta) => {
                if self.signal.request(delta) {
                    info!(delta, pending = self.signal.pending(), "scale request accepted");
                } else {
                    warn!(delta, "configured signal does not take manual requests");
                }
            }
        }
    }

    /// Run ticks separated by `interval` until shutdown, handling operator
    /// commands while waiting.
    pub async fn run(&mut self, interval: Duration, mut commands: mpsc::Receiver<Command>) {
        info!(interval_ms = interval.as_millis() as u64, floor = self.settings.floor, "reconciler loop started");

        if let Err(ControlError::Cancelled) = self.wait_for_primary().await {
            info!("reconciler stopped before start");
            return;
        }
        if let Err(e) = self.start().await {
            warn!(error = %e, "initial observation failed, first tick will retry");
        }

        loop {
            if is_shutdown(&self.shutdown) {
                break;
            }
            let state = self.tick().await;
            debug!(%state, ticks = self.status.ticks, "tick complete");

            let deadline = tokio::time::Instant::now() + interval;
            loop {
                let mut stop = self.shutdown.clone();
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    Some(command) = commands.recv() => self.handle_command(command).await,
                    true = async { stop.wait_for(|s| *s).await.is_ok() } => {
                        info!("reconciler shutting down");
                        return;
                    }
                }
            }
        }
        info!("reconciler shutting down");
    }
}
