//! Orchestrator client over the Kubernetes `scale` subresource.
//!
//! Reads `GET .../statefulsets/{name}/scale` and patches `spec.replicas`
//! with a JSON merge patch. Addressability is a TCP probe of the member's
//! stable DNS name on the data port.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use replisync_core::{BoxFuture, ControlError, ControlResult, ControllerConfig, HostScheme};

use crate::client::OrchestratorClient;
use crate::probe::tcp_probe;

/// The subset of `autoscaling/v1 Scale` the reconciler reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scale {
    #[serde(default)]
    pub spec: ScaleSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScaleSpec {
    /// Omitted by the API server when zero.
    #[serde(default)]
    pub replicas: u32,
}

pub struct KubeScaleClient {
    client: Client,
    scale_url: String,
    token: Option<String>,
    scheme: HostScheme,
    timeout: Duration,
}

impl KubeScaleClient {
    /// Client for the stateful workload `name` in `namespace`.
    pub fn new(
        api_url: &str,
        namespace: &str,
        name: &str,
        scheme: HostScheme,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to create orchestrator HTTP client")?;
        Ok(Self::with_client(client, api_url, namespace, name, scheme, timeout))
    }

    fn with_client(
        client: Client,
        api_url: &str,
        namespace: &str,
        name: &str,
        scheme: HostScheme,
        timeout: Duration,
    ) -> Self {
        let scale_url = format!(
            "{}/apis/apps/v1/namespaces/{namespace}/statefulsets/{name}/scale",
            api_url.trim_end_matches('/')
        );
        Self {
            client,
            scale_url,
            token: None,
            scheme,
            timeout,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Build from the `[orchestrator]` and `[workload]` config sections,
    /// reading the bearer token and CA bundle from disk when configured.
    pub fn from_config(config: &ControllerConfig, timeout: Duration) -> anyhow::Result<Self> {
        let orch = &config.orchestrator;
        let mut builder = Client::builder().timeout(timeout);

        if let Some(path) = &orch.ca_cert_path {
            match std::fs::read(path) {
                Ok(pem) => {
                    let cert = reqwest::Certificate::from_pem(&pem)
                        .with_context(|| format!("invalid CA certificate in {path}"))?;
                    builder = builder.add_root_certificate(cert);
                }
                Err(e) => warn!(%path, error = %e, "CA certificate not readable, using system roots"),
            }
        }
        if orch.insecure_skip_tls_verify {
            warn!("orchestrator TLS verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .context("failed to create orchestrator HTTP client")?;

        let mut kube = Self::with_client(
            client,
            &orch.api_url,
            &config.workload.namespace,
            &config.workload.name,
            config.host_scheme(),
            timeout,
        );
        if let Some(path) = &orch.token_path {
            match std::fs::read_to_string(path) {
                Ok(token) => kube = kube.with_token(token.trim()),
                Err(e) => warn!(%path, error = %e, "service account token not readable"),
            }
        }
        info!(url = %kube.scale_url, "orchestrator client configured");
        Ok(kube)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.header(AUTHORIZATION, format!("Bearer {token}")),
            None => req,
        }
    }

    fn transport_error(&self, operation: &str, e: reqwest::Error) -> ControlError {
        if e.is_timeout() {
            ControlError::timeout(operation, self.timeout)
        } else {
            ControlError::Unavailable(format!("{operation}: {e}"))
        }
    }

    async fn scale_from(&self, operation: &str, resp: reqwest::Response) -> ControlResult<Scale> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| self.transport_error(operation, e))?;
        if !status.is_success() {
            return Err(status_error(status, body));
        }
        serde_json::from_str(&body).map_err(|e| ControlError::Malformed {
            reason: format!("scale subresource: {e}"),
            payload: body,
        })
    }
}

fn status_error(status: StatusCode, body: String) -> ControlError {
    if status == StatusCode::CONFLICT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        ControlError::Unavailable(format!("{status}: {body}"))
    } else {
        ControlError::Rejected {
            status: status.as_u16(),
            message: body,
        }
    }
}

impl OrchestratorClient for KubeScaleClient {
    fn declared_replicas(&self) -> BoxFuture<'_, ControlResult<u32>> {
        Box::pin(async move {
            let resp = self
                .authorize(self.client.get(&self.scale_url))
                .send()
                .await
                .map_err(|e| self.transport_error("get_scale", e))?;
            let scale = self.scale_from("get_scale", resp).await?;
            debug!(replicas = scale.spec.replicas, "read declared replicas");
            Ok(scale.spec.replicas)
        })
    }

    fn set_declared_replicas(&self, replicas: u32) -> BoxFuture<'_, ControlResult<()>> {
        Box::pin(async move {
            if replicas < 1 {
                return Err(ControlError::InvalidTarget(replicas));
            }
            let patch = serde_json::json!({ "spec": { "replicas": replicas } });
            let resp = self
                .authorize(self.client.patch(&self.scale_url))
                .header(CONTENT_TYPE, "application/merge-patch+json")
                .body(patch.to_string())
                .send()
                .await
                .map_err(|e| self.transport_error("patch_scale", e))?;
            let scale = self.scale_from("patch_scale", resp).await?;
            if scale.spec.replicas != replicas {
                return Err(ControlError::Malformed {
                    reason: format!(
                        "patched replicas to {replicas}, server reports {}",
                        scale.spec.replicas
                    ),
                    payload: serde_json::to_string(&scale).unwrap_or_default(),
                });
            }
            info!(replicas, "declared replicas patched");
            Ok(())
        })
    }

    fn probe_addressable(&self, ordinal: u64) -> BoxFuture<'_, ControlResult<bool>> {
        Box::pin(async move {
            let address = self.scheme.host_for(ordinal);
            Ok(tcp_probe(&address, self.timeout).await)
        })
    }
}
