//! Remote platform capability.
//!
//! The monitoring platform's API is a black box to the engine: named
//! resources that can be created, updated, deleted and read, with failures
//! classified transient vs permanent by status class, never by message
//! text.

pub mod http;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use http::PlatformClient;

/// Resource kinds the reconciler manages on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Check,
    Monitor,
    Slo,
}

impl ResourceKind {
    pub fn path(&self) -> &'static str {
        match self {
            ResourceKind::Check => "checks",
            ResourceKind::Monitor => "monitors",
            ResourceKind::Slo => "slos",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Retryable: network failure, timeout, 408/429/5xx.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// Not retryable: the platform rejected the request (4xx).
    #[error("remote rejected request: {0}")]
    Permanent(String),

    #[error("resource not found")]
    NotFound,
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// Injected remote resource capability.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create(&self, kind: ResourceKind, body: &Value) -> Result<String, RemoteError>;
    async fn update(&self, kind: ResourceKind, id: &str, body: &Value) -> Result<(), RemoteError>;
    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), RemoteError>;
    async fn get(&self, kind: ResourceKind, id: &str) -> Result<Value, RemoteError>;
}
