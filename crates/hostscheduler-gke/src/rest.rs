//! RestClusterManager — the Kubernetes Engine v1 REST API over reqwest.
//!
//! | call                  | request                                      |
//! |-----------------------|----------------------------------------------|
//! | `get_cluster`         | `GET  v1/{cluster}`                          |
//! | `get_node_pool`       | `GET  v1/{pool}` + `GET` each instance group |
//! | `set_node_pool_size`  | `POST v1/{pool}:setSize`                     |
//! | `set_resource_labels` | `POST v1/{cluster}:setResourceLabels`        |
//! | `get_operation`       | `GET  v1/{operation}`                        |
//!
//! A node pool's current size lives on its managed instance groups
//! (`targetSize`, one group per zone); `initialNodeCount` is only used
//! when the pool has no groups.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use hostscheduler_core::{CloudOperation, ErrorCode, OperationStatus, ProviderError};
use hostscheduler_state::Labels;

use crate::api::{ClusterInfo, ClusterManagerApi, NodePoolInfo};
use crate::auth::TokenSource;

pub const DEFAULT_ENDPOINT: &str = "https://container.googleapis.com/v1/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterResource {
    name: String,
    #[serde(default)]
    node_pools: Vec<NodePoolResource>,
    #[serde(default)]
    resource_labels: Labels,
    #[serde(default)]
    label_fingerprint: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodePoolResource {
    name: String,
    #[serde(default)]
    initial_node_count: u32,
    #[serde(default)]
    instance_group_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceGroupManager {
    #[serde(default)]
    target_size: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResource {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    target_link: String,
    #[serde(default)]
    status_message: String,
    #[serde(default)]
    error: Option<RpcStatus>,
}

#[derive(Debug, Deserialize)]
struct RpcStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetSizeRequest {
    node_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetLabelsRequest<'a> {
    resource_labels: &'a BTreeMap<String, String>,
    label_fingerprint: &'a str,
}

// ── Client ────────────────────────────────────────────────────────

pub struct RestClusterManager {
    http: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn TokenSource>,
}

impl RestClusterManager {
    pub fn new(http: reqwest::Client, tokens: Arc<dyn TokenSource>) -> Self {
        Self::with_endpoint(http, tokens, DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(http: reqwest::Client, tokens: Arc<dyn TokenSource>, endpoint: &str) -> Self {
        let endpoint = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{endpoint}/")
        };
        Self { http, endpoint, tokens }
    }

    /// Shared HTTP client with the transport's default timeout.
    pub fn http_client() -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn bearer(&self) -> Result<String, ProviderError> {
        self.tokens.token().await.map_err(|e| e.into_provider())
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn post<B: Serialize + Sync, T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, ProviderError> {
        let token = self.bearer().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    /// Current per-zone size: the largest target across the pool's groups.
    async fn current_size(&self, pool: &NodePoolResource) -> Result<u32, ProviderError> {
        if pool.instance_group_urls.is_empty() {
            return Ok(pool.initial_node_count);
        }
        let mut size = 0;
        for url in &pool.instance_group_urls {
            let group: InstanceGroupManager = self.get(url).await?;
            size = size.max(group.target_size);
        }
        Ok(size)
    }
}

#[async_trait]
impl ClusterManagerApi for RestClusterManager {
    async fn get_cluster(&self, cluster_path: &str) -> Result<ClusterInfo, ProviderError> {
        let cluster: ClusterResource = self.get(&self.url(cluster_path)).await?;
        Ok(cluster_info(cluster))
    }

    async fn get_node_pool(&self, pool_path: &str) -> Result<NodePoolInfo, ProviderError> {
        let pool: NodePoolResource = self.get(&self.url(pool_path)).await?;
        let node_count = self.current_size(&pool).await?;
        debug!(pool = %pool.name, node_count, groups = pool.instance_group_urls.len(), "node pool size read");
        Ok(NodePoolInfo {
            name: pool.name,
            node_count,
        })
    }

    async fn set_node_pool_size(
        &self,
        pool_path: &str,
        node_count: u32,
    ) -> Result<CloudOperation, ProviderError> {
        let url = self.url(&format!("{pool_path}:setSize"));
        let op: OperationResource = self.post(&url, &SetSizeRequest { node_count }).await?;
        Ok(cloud_operation(op, pool_path))
    }

    async fn set_resource_labels(
        &self,
        cluster_path: &str,
        labels: &Labels,
        fingerprint: &str,
    ) -> Result<CloudOperation, ProviderError> {
        let url = self.url(&format!("{cluster_path}:setResourceLabels"));
        let body = SetLabelsRequest {
            resource_labels: labels,
            label_fingerprint: fingerprint,
        };
        let op: OperationResource = self.post(&url, &body).await?;
        Ok(cloud_operation(op, cluster_path))
    }

    async fn get_operation(&self, operation_path: &str) -> Result<CloudOperation, ProviderError> {
        let op: OperationResource = self.get(&self.url(operation_path)).await?;
        Ok(cloud_operation(op, ""))
    }
}

// ── Decoding ──────────────────────────────────────────────────────

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    if !status.is_success() {
        return Err(api_error(status.as_u16(), &body));
    }
    serde_json::from_str(&body).map_err(|e| {
        ProviderError::new(ErrorCode::Unknown, format!("unexpected response body: {e}"))
    })
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    let code = if err.is_timeout() {
        ErrorCode::DeadlineExceeded
    } else {
        ErrorCode::Unavailable
    };
    ProviderError::new(code, err.to_string())
}

/// Map a non-2xx response to a provider error, preferring the canonical
/// status name in the body over the HTTP status.
fn api_error(http_status: u16, body: &str) -> ProviderError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { error }) => {
            let code = match ErrorCode::from_status(&error.status) {
                ErrorCode::Unknown => ErrorCode::from_http(if error.code != 0 { error.code } else { http_status }),
                code => code,
            };
            ProviderError::new(code, error.message)
        }
        Err(_) => ProviderError::new(
            ErrorCode::from_http(http_status),
            format!("HTTP {http_status}: {}", body.trim()),
        ),
    }
}

fn cluster_info(cluster: ClusterResource) -> ClusterInfo {
    ClusterInfo {
        name: cluster.name,
        node_pools: cluster.node_pools.into_iter().map(|p| p.name).collect(),
        labels: cluster.resource_labels,
        label_fingerprint: cluster.label_fingerprint,
    }
}

/// Operations come back with `status: DONE` whether or not they failed;
/// a populated `error` marks the failure.
fn cloud_operation(op: OperationResource, fallback_target: &str) -> CloudOperation {
    let status = match op.status.as_str() {
        "PENDING" => OperationStatus::Pending,
        "DONE" if op.error.is_some() => OperationStatus::Error,
        "DONE" => OperationStatus::Done,
        _ => OperationStatus::Running,
    };
    let error = op.error.map(|e| {
        let message = if e.message.is_empty() { op.status_message.clone() } else { e.message };
        ProviderError::new(ErrorCode::from_rpc(e.code), message)
    });
    let target_resource = target_path(&op.target_link).unwrap_or(fallback_target).to_string();
    CloudOperation {
        id: op.name,
        target_resource,
        status,
        error,
    }
}

/// `https://container.googleapis.com/v1/projects/…` → `projects/…`
fn target_path(link: &str) -> Option<&str> {
    link.find("projects/").map(|i| &link[i..])
}
