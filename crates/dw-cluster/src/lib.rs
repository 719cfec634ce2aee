//! Cluster API access for the cluster under test.
//!
//! Fetches the facts some allowances depend on:
//! - Platform type and control plane topology from the `Infrastructure` resource
//! - The highest etcd revision rolled out, from the etcd operator status
//!
//! Everything here is best effort from the evaluator's point of view: callers
//! fall back to an empty [`ClusterContext`] when the fetch fails.

use std::fmt;
use std::time::Duration;

use dw_core::ClusterContext;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Default request timeout for API calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const INFRASTRUCTURE_PATH: &str = "/apis/config.openshift.io/v1/infrastructures/cluster";
const ETCD_OPERATOR_PATH: &str = "/apis/operator.openshift.io/v1/etcds/cluster";

/// Cluster client errors.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The API server URL was unusable.
    #[error("invalid API server: {reason}")]
    InvalidApiServer { reason: &'static str },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The requested resource does not exist.
    #[error("resource not found: {path}")]
    NotFound { path: String },
    /// API returned an error response.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    /// Failed to parse response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Client for the cluster's API server.
pub struct Client {
    http: reqwest::Client,
    api_server: String,
    token: Option<String>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("api_server", &self.api_server)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client for the given API server.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is empty or not http(s), or if the HTTP
    /// client fails to build.
    pub fn new(
        api_server: impl Into<String>,
        token: Option<String>,
        insecure_skip_tls_verify: bool,
    ) -> Result<Self, ClusterError> {
        let api_server = api_server.into();
        let api_server = api_server.trim().trim_end_matches('/').to_string();

        if api_server.is_empty() {
            return Err(ClusterError::InvalidApiServer {
                reason: "API server URL cannot be empty",
            });
        }
        if !(api_server.starts_with("https://") || api_server.starts_with("http://")) {
            return Err(ClusterError::InvalidApiServer {
                reason: "API server URL must start with http:// or https://",
            });
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .danger_accept_invalid_certs(insecure_skip_tls_verify)
            .build()
            .map_err(ClusterError::ClientBuild)?;

        let token = token.filter(|t| !t.trim().is_empty());
        Ok(Self {
            http,
            api_server,
            token,
        })
    }

    pub fn api_server(&self) -> &str {
        &self.api_server
    }

    /// Fetches platform type and control plane topology.
    pub async fn cluster_context(&self) -> Result<ClusterContext, ClusterError> {
        let body = self.get(INFRASTRUCTURE_PATH).await?;
        parse_infrastructure(&body)
    }

    /// Fetches the highest current revision across etcd members.
    ///
    /// A cluster without an etcd operator (e.g. `MicroShift`) reports 0.
    pub async fn etcd_revision(&self) -> Result<i64, ClusterError> {
        match self.get(ETCD_OPERATOR_PATH).await {
            Ok(body) => parse_etcd_revision(&body),
            Err(ClusterError::NotFound { path }) => {
                tracing::debug!(path, "no etcd operator, assuming revision 0");
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    async fn get(&self, path: &str) -> Result<String, ClusterError> {
        let mut request = self.http.get(format!("{}{path}", self.api_server));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::NOT_FOUND {
            return Err(ClusterError::NotFound {
                path: path.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ClusterError::Api {
                status: status.as_u16(),
                message: parse_api_error(&body).unwrap_or(body),
            });
        }
        Ok(body)
    }
}

/// Fetches the cluster context, falling back to an empty one on failure.
pub async fn fetch_context_or_default(client: &Client) -> ClusterContext {
    match client.cluster_context().await {
        Ok(context) => {
            tracing::info!(%context, "fetched cluster info");
            context
        }
        Err(err) => {
            tracing::warn!(error = %err, api_server = client.api_server(), "could not fetch cluster info");
            ClusterContext::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Infrastructure {
    #[serde(default)]
    status: InfrastructureStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfrastructureStatus {
    platform_status: Option<PlatformStatus>,
    #[serde(default)]
    control_plane_topology: String,
}

#[derive(Debug, Deserialize)]
struct PlatformStatus {
    #[serde(rename = "type", default)]
    kind: String,
}

fn parse_infrastructure(body: &str) -> Result<ClusterContext, ClusterError> {
    let infra: Infrastructure =
        serde_json::from_str(body).map_err(|err| ClusterError::InvalidResponse(err.to_string()))?;
    let platform = infra
        .status
        .platform_status
        .map(|status| status.kind)
        .filter(|kind| !kind.is_empty());
    let topology = Some(infra.status.control_plane_topology).filter(|t| !t.is_empty());
    Ok(ClusterContext::new(platform, topology))
}

fn parse_etcd_revision(body: &str) -> Result<i64, ClusterError> {
    #[derive(Deserialize)]
    struct Etcd {
        #[serde(default)]
        status: EtcdStatus,
    }

    #[derive(Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct EtcdStatus {
        #[serde(default)]
        node_statuses: Vec<NodeStatus>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct NodeStatus {
        #[serde(default)]
        current_revision: i64,
    }

    let etcd: Etcd =
        serde_json::from_str(body).map_err(|err| ClusterError::InvalidResponse(err.to_string()))?;
    Ok(etcd
        .status
        .node_statuses
        .iter()
        .map(|node| node.current_revision)
        .fold(0, i64::max))
}

fn parse_api_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Status {
        message: String,
    }

    serde_json::from_str::<Status>(body)
        .ok()
        .map(|status| status.message)
        .filter(|message| !message.is_empty())
}
