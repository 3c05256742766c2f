//! In-memory orchestrator for tests and `replisyncd simulate`.
//!
//! Pods with an ordinal below the declared count are addressable unless
//! explicitly held unready.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use replisync_core::{BoxFuture, ControlError, ControlResult};

use crate::client::OrchestratorClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrchestratorOp {
    Get,
    Set,
    Probe,
}

struct Inner {
    declared: u32,
    unready: BTreeSet<u64>,
    faults: HashMap<OrchestratorOp, VecDeque<ControlError>>,
    set_calls: u64,
    probe_calls: u64,
    history: Vec<u32>,
}

#[derive(Clone)]
pub struct InMemoryOrchestrator {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryOrchestrator {
    pub fn new(declared: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                declared,
                unready: BTreeSet::new(),
                faults: HashMap::new(),
                set_calls: 0,
                probe_calls: 0,
                history: vec![declared],
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("orchestrator lock")
    }

    pub fn declared(&self) -> u32 {
        self.lock().declared
    }

    /// Every declared count held so far, including external changes.
    pub fn history(&self) -> Vec<u32> {
        self.lock().history.clone()
    }

    pub fn set_calls(&self) -> u64 {
        self.lock().set_calls
    }

    pub fn probe_calls(&self) -> u64 {
        self.lock().probe_calls
    }

    /// Hold the pod for `ordinal` unready (or release it).
    pub fn set_unready(&self, ordinal: u64, unready: bool) {
        let mut inner = self.lock();
        if unready {
            inner.unready.insert(ordinal);
        } else {
            inner.unready.remove(&ordinal);
        }
    }

    pub fn fail_next(&self, op: OrchestratorOp, err: ControlError) {
        self.lock().faults.entry(op).or_default().push_back(err);
    }

    /// Change the declared count out of band, as an operator would.
    pub fn scale_externally(&self, replicas: u32) {
        let mut inner = self.lock();
        inner.declared = replicas;
        inner.history.push(replicas);
        info!(replicas, "external orchestrator scale");
    }

    fn take_fault(inner: &mut Inner, op: OrchestratorOp) -> Option<ControlError> {
        inner.faults.get_mut(&op).and_then(|q| q.pop_front())
    }
}

impl OrchestratorClient for InMemoryOrchestrator {
    fn declared_replicas(&self) -> BoxFuture<'_, ControlResult<u32>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if let Some(err) = Self::take_fault(&mut inner, OrchestratorOp::Get) {
                return Err(err);
            }
            Ok(inner.declared)
        })
    }

    fn set_declared_replicas(&self, replicas: u32) -> BoxFuture<'_, ControlResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.set_calls += 1;
            if replicas < 1 {
                return Err(ControlError::InvalidTarget(replicas));
            }
            if let Some(err) = Self::take_fault(&mut inner, OrchestratorOp::Set) {
                return Err(err);
            }
            inner.declared = replicas;
            inner.history.push(replicas);
            debug!(replicas, "declared replicas patched");
            Ok(())
        })
    }

    fn probe_addressable(&self, ordinal: u64) -> BoxFuture<'_, ControlResult<bool>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.probe_calls += 1;
            if let Some(err) = Self::take_fault(&mut inner, OrchestratorOp::Probe) {
                return Err(err);
            }
            Ok(ordinal < u64::from(inner.declared) && !inner.unready.contains(&ordinal))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_target_is_invalid() {
        let orch = InMemoryOrchestrator::new(3);
        assert_eq!(
            orch.set_declared_replicas(0).await,
            Err(ControlError::InvalidTarget(0))
        );
        assert_eq!(orch.declared(), 3);
    }

    #[tokio::test]
    async fn set_records_history() {
        let orch = InMemoryOrchestrator::new(3);
        orch.set_declared_replicas(4).await.unwrap();
        orch.scale_externally(6);
        assert_eq!(orch.declared_replicas().await, Ok(6));
        assert_eq!(orch.history(), vec![3, 4, 6]);
        assert_eq!(orch.set_calls(), 1);
    }

    #[tokio::test]
    async fn only_declared_ordinals_are_addressable() {
        let orch = InMemoryOrchestrator::new(3);
        assert_eq!(orch.probe_addressable(2).await, Ok(true));
        assert_eq!(orch.probe_addressable(3).await, Ok(false));
    }

    #[tokio::test]
    async fn scripted_fault_fires_once() {
        let orch = InMemoryOrchestrator::new(3);
        orch.fail_next(OrchestratorOp::Get, ControlError::Unavailable("api down".into()));
        assert!(orch.declared_replicas().await.is_err());
        assert_eq!(orch.declared_replicas().await, Ok(3));
    }
}
