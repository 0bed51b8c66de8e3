//! Backend-neutral domain types.
//!
//! These types describe the clusters and node pools the scheduler acts
//! on, and the transient long-running operations a cloud provider hands
//! back for every capacity mutation.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Cluster ───────────────────────────────────────────────────────

/// Logical identifier of a cluster.
///
/// Each backend resolves it into a fully-qualified resource path without
/// any external lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterRef {
    pub name: String,
}

impl ClusterRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Size of a single node pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolCapacity {
    pub pool_name: String,
    /// Nodes per zone, as accepted by the provider's resize call.
    pub node_count: u32,
}

impl NodePoolCapacity {
    pub fn new(pool_name: impl Into<String>, node_count: u32) -> Self {
        Self {
            pool_name: pool_name.into(),
            node_count,
        }
    }
}

/// Lifecycle phase derived from the hibernation record and live capacity.
///
/// Only `Active` and `Hibernated` are terminal; anything in between is a
/// `stop` or `start` that has not finished yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Active,
    Transitioning,
    Hibernated,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecyclePhase::Active => "active",
            LifecyclePhase::Transitioning => "transitioning",
            LifecyclePhase::Hibernated => "hibernated",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a cluster returned by `describe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub cluster: String,
    pub phase: LifecyclePhase,
    /// Live node pool sizes, in the order the provider lists them.
    pub pools: Vec<NodePoolCapacity>,
    /// Capacities recorded at hibernation time, if hibernated.
    pub recorded: Option<Vec<NodePoolCapacity>>,
    /// Unix timestamp (seconds) the record was written.
    pub hibernated_at: Option<u64>,
}

// ── Cloud operation ───────────────────────────────────────────────

/// Status of a long-running cloud operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Done | OperationStatus::Error)
    }
}

/// Handle to an asynchronous provider-side mutation.
///
/// Exists only while the waiter polls it; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudOperation {
    pub id: String,
    pub target_resource: String,
    pub status: OperationStatus,
    pub error: Option<ProviderError>,
}

impl CloudOperation {
    pub fn new(id: impl Into<String>, target_resource: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target_resource: target_resource.into(),
            status: OperationStatus::Pending,
            error: None,
        }
    }
}

// ── Provider errors ───────────────────────────────────────────────

/// Canonical provider error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    FailedPrecondition,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    ResourceExhausted,
    Aborted,
    Unavailable,
    DeadlineExceeded,
    Internal,
    Unknown,
}

/// How a provider error should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; the same request may be re-issued.
    Retryable,
    /// Another mutation raced this one; the caller should retry later.
    Conflict,
    /// Surface immediately.
    Fatal,
}

impl ErrorCode {
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorCode::ResourceExhausted
            | ErrorCode::Unavailable
            | ErrorCode::Internal
            | ErrorCode::DeadlineExceeded => ErrorClass::Retryable,
            ErrorCode::Aborted => ErrorClass::Conflict,
            _ => ErrorClass::Fatal,
        }
    }

    /// Parse a canonical status name (`"RESOURCE_EXHAUSTED"`).
    pub fn from_status(status: &str) -> Self {
        match status {
            "INVALID_ARGUMENT" | "OUT_OF_RANGE" => ErrorCode::InvalidArgument,
            "FAILED_PRECONDITION" => ErrorCode::FailedPrecondition,
            "NOT_FOUND" => ErrorCode::NotFound,
            "ALREADY_EXISTS" => ErrorCode::AlreadyExists,
            "PERMISSION_DENIED" => ErrorCode::PermissionDenied,
            "UNAUTHENTICATED" => ErrorCode::Unauthenticated,
            "RESOURCE_EXHAUSTED" => ErrorCode::ResourceExhausted,
            "ABORTED" => ErrorCode::Aborted,
            "UNAVAILABLE" => ErrorCode::Unavailable,
            "DEADLINE_EXCEEDED" => ErrorCode::DeadlineExceeded,
            "INTERNAL" | "DATA_LOSS" => ErrorCode::Internal,
            _ => ErrorCode::Unknown,
        }
    }

    /// Map a numeric `google.rpc.Code`.
    pub fn from_rpc(code: i32) -> Self {
        match code {
            3 | 11 => ErrorCode::InvalidArgument,
            9 => ErrorCode::FailedPrecondition,
            5 => ErrorCode::NotFound,
            6 => ErrorCode::AlreadyExists,
            7 => ErrorCode::PermissionDenied,
            16 => ErrorCode::Unauthenticated,
            8 => ErrorCode::ResourceExhausted,
            10 => ErrorCode::Aborted,
            14 => ErrorCode::Unavailable,
            4 => ErrorCode::DeadlineExceeded,
            13 | 15 => ErrorCode::Internal,
            _ => ErrorCode::Unknown,
        }
    }

    /// Map an HTTP status when the body carries no canonical status.
    pub fn from_http(status: u16) -> Self {
        match status {
            400 => ErrorCode::InvalidArgument,
            401 => ErrorCode::Unauthenticated,
            403 => ErrorCode::PermissionDenied,
            404 => ErrorCode::NotFound,
            409 => ErrorCode::Aborted,
            412 => ErrorCode::FailedPrecondition,
            429 => ErrorCode::ResourceExhausted,
            500 => ErrorCode::Internal,
            503 => ErrorCode::Unavailable,
            504 => ErrorCode::DeadlineExceeded,
            _ => ErrorCode::Unknown,
        }
    }
}

/// Error reported by the cloud provider, either when issuing a request
/// or as the terminal state of an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct ProviderError {
    pub code: ErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.code.class()
    }
}
