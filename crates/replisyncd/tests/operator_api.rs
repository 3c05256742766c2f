//! Operator API against a running reconciler loop.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::sync::{mpsc, watch};
use tower::ServiceExt;

use replisync_api::{ApiState, build_router};
use replisync_core::{ControlError, HostScheme, RetryPolicy};
use replisync_membership::{InMemoryMembershipStore, MembershipProtocol, StoreOp};
use replisync_orchestrator::InMemoryOrchestrator;
use replisync_policy::ManualSignal;
use replisync_reconciler::{Reconciler, ReconcilerSettings, ReconcilerState, ReconcilerStatus};

struct Running {
    router: axum::Router,
    store: InMemoryMembershipStore,
    orch: InMemoryOrchestrator,
    status: watch::Receiver<ReconcilerStatus>,
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

fn start(declared: u32, members: u32) -> Running {
    let scheme = HostScheme::new("mongo", "mongo.default.svc.cluster.local", 27017);
    let store = InMemoryMembershipStore::bootstrap("rs0", &scheme, members);
    let orch = InMemoryOrchestrator::new(declared);
    let settings = ReconcilerSettings {
        floor: 3,
        scheme,
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            call_timeout: Duration::from_secs(1),
        },
        addressable_timeout: Duration::from_secs(2),
        addressable_poll: Duration::from_millis(100),
        primary_wait: Duration::from_secs(1),
    };
    let (shutdown, shutdown_rx) = watch::channel(false);
    let (commands, command_rx) = mpsc::channel(8);
    let protocol = MembershipProtocol::new(Arc::new(store.clone()), settings.retry.clone());
    let mut reconciler = Reconciler::new(
        Arc::new(orch.clone()),
        protocol,
        Arc::new(ManualSignal::new()),
        settings,
        shutdown_rx,
    );
    let status = reconciler.subscribe();
    let router = build_router(ApiState {
        status: status.clone(),
        commands,
    });
    let handle = tokio::spawn(async move {
        reconciler.run(Duration::from_secs(5), command_rx).await;
    });

    Running {
        router,
        store,
        orch,
        status,
        shutdown,
        handle,
    }
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test(start_paused = true)]
async fn healthz_is_ok() {
    let r = start(3, 3);
    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let resp = r.router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn status_reports_convergence() {
    let r = start(5, 3);
    tokio::time::sleep(Duration::from_secs(7)).await;

    let req = Request::builder().uri("/api/v1/status").body(Body::empty()).unwrap();
    let resp = r.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = json_body(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["state"], "SYNCHRONIZED");
    assert_eq!(body["data"]["observed"]["membership_replicas"], 5);
    assert_eq!(body["data"]["applies"], 2);

    r.shutdown.send(true).unwrap();
    r.handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn scale_request_drives_reconciler() {
    let r = start(3, 3);

    let resp = r
        .router
        .clone()
        .oneshot(post("/api/v1/scale", r#"{"delta": 1}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(r.store.member_count(), 4);
    assert_eq!(r.orch.declared(), 4);

    r.shutdown.send(true).unwrap();
    r.handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn zero_delta_is_rejected() {
    let r = start(3, 3);
    let resp = r
        .router
        .oneshot(post("/api/v1/scale", r#"{"delta": 0}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = json_body(resp).await;
    assert_eq!(body["success"], false);
}

#[tokio::test(start_paused = true)]
async fn reset_recovers_from_failure() {
    let r = start(3, 3);
    r.store
        .fail_next(StoreOp::Apply, ControlError::QuorumLoss("no majority".into()));

    let resp = r
        .router
        .clone()
        .oneshot(post("/api/v1/scale", r#"{"delta": 1}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(r.status.borrow().state.is_failed());

    let resp = r.router.clone().oneshot(post("/api/v1/reset", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    tokio::time::sleep(Duration::from_secs(1)).await;
    // The orchestrator had already grown; reset re-observes drift.
    assert_eq!(r.status.borrow().state, ReconcilerState::Drift);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(r.status.borrow().state, ReconcilerState::Synchronized);
    assert_eq!(r.store.member_count(), 4);

    r.shutdown.send(true).unwrap();
    r.handle.await.unwrap();
}
