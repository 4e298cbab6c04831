//! HTTP-backed platform client.

use async_trait::async_trait;
use serde_json::Value;

use crate::remote::{RemoteApi, RemoteError, ResourceKind};

/// Environment variables holding the platform credentials.
pub const API_KEY_VAR: &str = "HC_API_KEY";
pub const APP_KEY_VAR: &str = "HC_APP_KEY";

/// Thin JSON client for the platform's resource API:
/// `POST/PUT/DELETE/GET {base}/api/v1/{kind}[/{id}]`.
pub struct PlatformClient {
    base_url: url::Url,
    client: reqwest::Client,
    api_key: String,
    app_key: String,
}

impl PlatformClient {
    /// Build a client from an explicit base URL and credentials taken
    /// from the environment.
    pub fn from_env(base_url: &str) -> Result<Self, RemoteError> {
        let api_key = std::env::var(API_KEY_VAR)
            .map_err(|_| RemoteError::Permanent(format!("{} is not set", API_KEY_VAR)))?;
        let app_key = std::env::var(APP_KEY_VAR)
            .map_err(|_| RemoteError::Permanent(format!("{} is not set", APP_KEY_VAR)))?;
        Self::new(base_url, api_key, app_key)
    }

    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        app_key: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        let base_url = url::Url::parse(base_url)
            .map_err(|e| RemoteError::Permanent(format!("invalid base URL: {}", e)))?;
        Ok(Self {
            base_url,
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            app_key: app_key.into(),
        })
    }

    fn endpoint(&self, kind: ResourceKind, id: Option<&str>) -> String {
        let mut endpoint = self.base_url.to_string();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        endpoint.push_str("api/v1/");
        endpoint.push_str(kind.path());
        if let Some(id) = id {
            endpoint.push('/');
            endpoint.push_str(id);
        }
        endpoint
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Value, RemoteError> {
        let response = request
            .header("X-Api-Key", &self.api_key)
            .header("X-App-Key", &self.app_key)
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        classify(status, body)
    }
}

/// Classify a platform response by status class, not message text.
fn classify(status: reqwest::StatusCode, body: Value) -> Result<Value, RemoteError> {
    if status.is_success() {
        return Ok(body);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(RemoteError::NotFound);
    }
    if status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        return Err(RemoteError::Transient(format!("status {}", status)));
    }
    Err(RemoteError::Permanent(format!("status {}", status)))
}

#[async_trait]
impl RemoteApi for PlatformClient {
    async fn create(&self, kind: ResourceKind, body: &Value) -> Result<String, RemoteError> {
        let response = self
            .execute(self.client.post(self.endpoint(kind, None)).json(body))
            .await?;
        response
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RemoteError::Permanent("create response carried no id".to_string()))
    }

    async fn update(&self, kind: ResourceKind, id: &str, body: &Value) -> Result<(), RemoteError> {
        self.execute(self.client.put(self.endpoint(kind, Some(id))).json(body))
            .await
            .map(|_| ())
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), RemoteError> {
        self.execute(self.client.delete(self.endpoint(kind, Some(id))))
            .await
            .map(|_| ())
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> Result<Value, RemoteError> {
        self.execute(self.client.get(self.endpoint(kind, Some(id))))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_status_class() {
        use reqwest::StatusCode;

        assert!(classify(StatusCode::OK, Value::Null).is_ok());
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, Value::Null),
            Err(RemoteError::NotFound)
        ));
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, Value::Null),
            Err(RemoteError::Transient(_))
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, Value::Null),
            Err(RemoteError::Transient(_))
        ));
        assert!(matches!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, Value::Null),
            Err(RemoteError::Permanent(_))
        ));
    }
}
