//! `replisyncd simulate` — the reconciler against in-memory doubles.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use replisync_core::{HostScheme, RetryPolicy};
use replisync_membership::{InMemoryMembershipStore, MembershipProtocol};
use replisync_orchestrator::InMemoryOrchestrator;
use replisync_policy::{ManualSignal, ScaleSignal};
use replisync_reconciler::{Reconciler, ReconcilerSettings};

pub struct SimulateArgs {
    pub orchestrator: u32,
    pub members: u32,
    pub floor: u32,
    pub ticks: u32,
    pub requests: i32,
}

pub async fn run(args: SimulateArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.floor >= 1, "--floor must be at least 1");

    let scheme = HostScheme::new("mongo", "mongo.default.svc.cluster.local", 27017);
    let orchestrator = InMemoryOrchestrator::new(args.orchestrator);
    let store = InMemoryMembershipStore::bootstrap("rs0", &scheme, args.members);
    let signal = Arc::new(ManualSignal::new());
    if args.requests != 0 {
        signal.request(args.requests);
    }

    let settings = ReconcilerSettings {
        floor: args.floor,
        scheme,
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            call_timeout: Duration::from_secs(1),
        },
        addressable_timeout: Duration::from_millis(100),
        addressable_poll: Duration::from_millis(10),
        primary_wait: Duration::ZERO,
    };
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let membership = MembershipProtocol::new(Arc::new(store.clone()), settings.retry.clone());
    let mut reconciler = Reconciler::new(
        Arc::new(orchestrator.clone()),
        membership,
        signal.clone(),
        settings,
        shutdown_rx,
    );

    let initial = reconciler.start().await?;
    info!(
        orchestrator = args.orchestrator,
        members = args.members,
        floor = args.floor,
        "simulation started"
    );
    println!(
        "tick  0: {:<14} orchestrator={} members={} version={}",
        initial.to_string(),
        orchestrator.declared(),
        store.member_count(),
        store.version()
    );

    for n in 1..=args.ticks {
        let state = reconciler.tick().await;
        println!(
            "tick {n:>2}: {:<14} orchestrator={} members={} version={} pending={}",
            state.to_string(),
            orchestrator.declared(),
            store.member_count(),
            store.version(),
            signal.pending()
        );
        if state.is_failed() {
            break;
        }
    }
    Ok(())
}
