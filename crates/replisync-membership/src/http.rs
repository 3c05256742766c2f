//! HTTP client for the data store's admin API.
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | GET | `/v1/groups/{group}/config` | → `MembershipConfig` |
//! | PUT | `/v1/groups/{group}/config` | `ReconfigureRequest` → `ReconfigureResponse` |
//! | GET | `/v1/groups/{group}/status` | → `GroupStatus` |
//!
//! Errors come back as `ErrorBody`; `409` is a version conflict and
//! `code = "quorum_loss"` a refused reconfiguration.

use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use replisync_core::{BoxFuture, ControlError, ControlResult, GroupStatus, MembershipConfig};

use crate::client::MembershipClient;

/// Body of a version-checked reconfiguration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconfigureRequest {
    pub expected_version: u64,
    pub config: MembershipConfig,
}

/// Confirmation that a configuration version was committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconfigureResponse {
    pub version: u64,
}

/// Error envelope returned by the admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<u64>,
}

/// Membership client over the admin HTTP API.
pub struct HttpAdminClient {
    client: Client,
    base_url: String,
    group: String,
    timeout: Duration,
}

impl HttpAdminClient {
    /// Create a client for `group` at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str, group: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to create admin HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            group: group.to_string(),
            timeout,
        })
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/v1/groups/{}/{resource}", self.base_url, self.group)
    }

    fn transport_error(&self, operation: &str, e: reqwest::Error) -> ControlError {
        if e.is_timeout() {
            ControlError::timeout(operation, self.timeout)
        } else {
            ControlError::Unavailable(format!("{operation}: {e}"))
        }
    }

    async fn read(
        &self,
        operation: &str,
        resp: reqwest::Response,
    ) -> ControlResult<(StatusCode, String)> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| self.transport_error(operation, e))?;
        Ok((status, body))
    }
}

fn decode<T: DeserializeOwned>(what: &str, body: &str) -> ControlResult<T> {
    serde_json::from_str(body).map_err(|e| {
        warn!(what, error = %e, payload = %body, "unparsable admin response");
        ControlError::Malformed {
            reason: format!("{what}: {e}"),
            payload: body.to_string(),
        }
    })
}

/// Map a non-2xx admin response onto the error taxonomy.
fn error_from_response(status: StatusCode, body: &str, expected_version: Option<u64>) -> ControlError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .map(|b| b.message.clone())
        .unwrap_or_else(|| body.to_string());

    if parsed.as_ref().is_some_and(|b| b.code == "quorum_loss") {
        return ControlError::QuorumLoss(message);
    }

    match status {
        StatusCode::CONFLICT => ControlError::VersionConflict {
            expected: expected_version.unwrap_or_default(),
            actual: parsed.and_then(|b| b.current_version).unwrap_or_default(),
        },
        StatusCode::TOO_MANY_REQUESTS => ControlError::Unavailable(format!("{status}: {message}")),
        s if s.is_server_error() => ControlError::Unavailable(format!("{status}: {message}")),
        _ => ControlError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

impl MembershipClient for HttpAdminClient {
    fn fetch_config(&self) -> BoxFuture<'_, ControlResult<MembershipConfig>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(self.url("config"))
                .send()
                .await
                .map_err(|e| self.transport_error("fetch_config", e))?;
            let (status, body) = self.read("fetch_config", resp).await?;
            if !status.is_success() {
                return Err(error_from_response(status, &body, None));
            }

            let config: MembershipConfig = decode("membership config", &body)?;
            config.validate()?;
            debug!(version = config.version, members = config.len(), "fetched membership config");
            Ok(config)
        })
    }

    fn apply_config<'a>(
        &'a self,
        config: &'a MembershipConfig,
        expected_base_version: u64,
    ) -> BoxFuture<'a, ControlResult<u64>> {
        Box::pin(async move {
            let request = ReconfigureRequest {
                expected_version: expected_base_version,
                config: config.clone(),
            };
            let resp = self
                .client
                .put(self.url("config"))
                .json(&request)
                .send()
                .await
                .map_err(|e| self.transport_error("apply_config", e))?;
            let (status, body) = self.read("apply_config", resp).await?;
            if !status.is_success() {
                return Err(error_from_response(status, &body, Some(expected_base_version)));
            }

            let ack: ReconfigureResponse = decode("reconfigure response", &body)?;
            if ack.version != config.version {
                return Err(ControlError::Malformed {
                    reason: format!(
                        "store confirmed version {}, proposed {}",
                        ack.version, config.version
                    ),
                    payload: body,
                });
            }
            Ok(ack.version)
        })
    }

    fn fetch_status(&self) -> BoxFuture<'_, ControlResult<GroupStatus>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(self.url("status"))
                .send()
                .await
                .map_err(|e| self.transport_error("fetch_status", e))?;
            let (status, body) = self.read("fetch_status", resp).await?;
            if !status.is_success() {
                return Err(error_from_response(status, &body, None));
            }
            decode("group status", &body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryMembershipStore, StoreOp};
    use axum::Json;
    use axum::Router;
    use axum::extract::State;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use replisync_core::{HostScheme, Member};

    fn stub_error(err: ControlError) -> Response {
        let (status, code, current_version) = match &err {
            ControlError::VersionConflict { actual, .. } => {
                (StatusCode::CONFLICT, "version_conflict", Some(*actual))
            }
            ControlError::QuorumLoss(_) => (StatusCode::SERVICE_UNAVAILABLE, "quorum_loss", None),
            ControlError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", None),
            _ => (StatusCode::BAD_REQUEST, "rejected", None),
        };
        let body = ErrorBody {
            code: code.to_string(),
            message: err.to_string(),
            current_version,
        };
        (status, Json(body)).into_response()
    }

    async fn get_config(State(store): State<InMemoryMembershipStore>) -> Response {
        match store.fetch_config().await {
            Ok(config) => Json(config).into_response(),
            Err(e) => stub_error(e),
        }
    }

    async fn put_config(
        State(store): State<InMemoryMembershipStore>,
        Json(req): Json<ReconfigureRequest>,
    ) -> Response {
        match store.apply_config(&req.config, req.expected_version).await {
            Ok(version) => Json(ReconfigureResponse { version }).into_response(),
            Err(e) => stub_error(e),
        }
    }

    async fn get_status(State(store): State<InMemoryMembershipStore>) -> Response {
        match store.fetch_status().await {
            Ok(status) => Json(status).into_response(),
            Err(e) => stub_error(e),
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn admin_stub(store: InMemoryMembershipStore) -> HttpAdminClient {
        let router = Router::new()
            .route("/v1/groups/rs0/config", get(get_config).put(put_config))
            .route("/v1/groups/rs0/status", get(get_status))
            .with_state(store);
        let url = serve(router).await;
        HttpAdminClient::new(&url, "rs0", Duration::from_secs(2)).unwrap()
    }

    fn scheme() -> HostScheme {
        HostScheme::new("mongo", "mongo.default.svc.cluster.local", 27017)
    }

    #[tokio::test]
    async fn fetch_and_apply_round_trip() {
        let store = InMemoryMembershipStore::bootstrap("rs0", &scheme(), 3);
        let client = admin_stub(store.clone()).await;

        let cfg = client.fetch_config().await.unwrap();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.len(), 3);

        let next = cfg.with_member(Member::new(3, scheme().host_for(3)));
        assert_eq!(client.apply_config(&next, cfg.version).await, Ok(2));
        assert_eq!(store.member_count(), 4);
    }

    #[tokio::test]
    async fn conflict_maps_to_version_conflict() {
        let store = InMemoryMembershipStore::bootstrap("rs0", &scheme(), 3);
        let client = admin_stub(store.clone()).await;

        let cfg = client.fetch_config().await.unwrap();
        store.mutate_externally(|_| {});

        let next = cfg.with_member(Member::new(3, scheme().host_for(3)));
        assert_eq!(
            client.apply_config(&next, cfg.version).await,
            Err(ControlError::VersionConflict { expected: 1, actual: 2 })
        );
    }

    #[tokio::test]
    async fn quorum_loss_body_maps_to_quorum_loss() {
        let store = InMemoryMembershipStore::bootstrap("rs0", &scheme(), 3);
        store.set_reachable(0, false);
        store.set_reachable(1, false);
        let client = admin_stub(store.clone()).await;

        let cfg = client.fetch_config().await.unwrap();
        let next = cfg.without_member(2);
        assert!(matches!(
            client.apply_config(&next, cfg.version).await,
            Err(ControlError::QuorumLoss(_))
        ));
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let store = InMemoryMembershipStore::bootstrap("rs0", &scheme(), 3);
        store.fail_next(StoreOp::Fetch, ControlError::Unavailable("stepping down".into()));
        let client = admin_stub(store).await;

        let err = client.fetch_config().await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
        assert!(client.fetch_config().await.is_ok());
    }

    #[tokio::test]
    async fn status_is_decoded() {
        let store = InMemoryMembershipStore::bootstrap("rs0", &scheme(), 3);
        store.set_reachable(2, false);
        let client = admin_stub(store).await;

        let status = client.fetch_status().await.unwrap();
        assert_eq!(status.members.len(), 3);
        assert!(!status.members[2].reachable);
        assert_eq!(status.primary, Some(0));
    }

    #[tokio::test]
    async fn unparsable_body_is_malformed_with_payload() {
        let router = Router::new().route(
            "/v1/groups/rs0/config",
            get(|| async { "<html>gateway</html>" }),
        );
        let url = serve(router).await;
        let client = HttpAdminClient::new(&url, "rs0", Duration::from_secs(2)).unwrap();

        match client.fetch_config().await {
            Err(ControlError::Malformed { payload, .. }) => {
                assert_eq!(payload, "<html>gateway</html>");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_admin_is_unavailable() {
        let client =
            HttpAdminClient::new("http://127.0.0.1:1", "rs0", Duration::from_secs(1)).unwrap();
        let err = client.fetch_config().await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }

    #[test]
    fn error_mapping() {
        assert_eq!(
            error_from_response(
                StatusCode::CONFLICT,
                r#"{"code":"version_conflict","message":"stale","current_version":9}"#,
                Some(8)
            ),
            ControlError::VersionConflict { expected: 8, actual: 9 }
        );
        assert!(matches!(
            error_from_response(StatusCode::FORBIDDEN, "denied", None),
            ControlError::Rejected { status: 403, .. }
        ));
        assert!(matches!(
            error_from_response(StatusCode::BAD_GATEWAY, "", None),
            ControlError::Unavailable(_)
        ));
    }
}
