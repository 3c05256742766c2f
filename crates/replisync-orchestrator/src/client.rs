use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use replisync_core::retry::{is_shutdown, sleep_or_shutdown};
use replisync_core::{BoxFuture, ControlError, ControlResult};

/// Read and patch the declared scale of the stateful workload.
pub trait OrchestratorClient: Send + Sync {
    /// Current declared replica count.
    fn declared_replicas(&self) -> BoxFuture<'_, ControlResult<u32>>;

    /// Patch the declared replica count. `0` is an [`ControlError::InvalidTarget`].
    fn set_declared_replicas(&self, replicas: u32) -> BoxFuture<'_, ControlResult<()>>;

    /// One probe of whether `ordinal`'s stable address accepts connections.
    fn probe_addressable(&self, ordinal: u64) -> BoxFuture<'_, ControlResult<bool>>;
}

impl<T: OrchestratorClient + ?Sized> OrchestratorClient for Arc<T> {
    fn declared_replicas(&self) -> BoxFuture<'_, ControlResult<u32>> {
        (**self).declared_replicas()
    }

    fn set_declared_replicas(&self, replicas: u32) -> BoxFuture<'_, ControlResult<()>> {
        (**self).set_declared_replicas(replicas)
    }

    fn probe_addressable(&self, ordinal: u64) -> BoxFuture<'_, ControlResult<bool>> {
        (**self).probe_addressable(ordinal)
    }
}

/// Poll `probe_addressable` every `poll` until it succeeds or `timeout`
/// elapses. Returns `Ok(false)` on timeout.
///
/// Probe errors count as "not yet"; only shutdown aborts the wait early.
pub async fn await_addressable(
    client: &dyn OrchestratorClient,
    ordinal: u64,
    timeout: Duration,
    poll: Duration,
    shutdown: &watch::Receiver<bool>,
) -> ControlResult<bool> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut probes = 0u32;

    loop {
        if is_shutdown(shutdown) {
            return Err(ControlError::Cancelled);
        }

        probes += 1;
        match client.probe_addressable(ordinal).await {
            Ok(true) => {
                info!(ordinal, probes, "member address reachable");
                return Ok(true);
            }
            Ok(false) => debug!(ordinal, probes, "member address not reachable yet"),
            Err(e) => debug!(ordinal, probes, error = %e, "addressability probe failed"),
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            warn!(ordinal, probes, timeout_ms = timeout.as_millis() as u64, "member never became addressable");
            return Ok(false);
        }
        if !sleep_or_shutdown(poll.min(deadline - now), shutdown).await {
            return Err(ControlError::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryOrchestrator;

    #[tokio::test(start_paused = true)]
    async fn addressable_once_pod_is_declared() {
        let orch = InMemoryOrchestrator::new(3);
        let (_tx, rx) = watch::channel(false);

        orch.set_declared_replicas(4).await.unwrap();
        let ok = await_addressable(&orch, 3, Duration::from_secs(5), Duration::from_secs(1), &rx)
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_pod_never_comes_up() {
        let orch = InMemoryOrchestrator::new(3);
        orch.set_unready(3, true);
        orch.set_declared_replicas(4).await.unwrap();
        let (_tx, rx) = watch::channel(false);

        let start = tokio::time::Instant::now();
        let ok = await_addressable(&orch, 3, Duration::from_secs(5), Duration::from_secs(1), &rx)
            .await
            .unwrap();

        assert!(!ok);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(orch.probe_calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn becomes_addressable_mid_wait() {
        let orch = InMemoryOrchestrator::new(4);
        orch.set_unready(3, true);
        let (_tx, rx) = watch::channel(false);

        let o = orch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            o.set_unready(3, false);
        });

        let ok = await_addressable(&orch, 3, Duration::from_secs(10), Duration::from_secs(1), &rx)
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(orch.probe_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_wait() {
        let orch = InMemoryOrchestrator::new(3);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            await_addressable(&orch, 7, Duration::from_secs(60), Duration::from_secs(1), &rx).await
        });
        tokio::time::sleep(Duration::from_millis(1500)).await;
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), Err(ControlError::Cancelled));
    }
}
