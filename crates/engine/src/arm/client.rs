//! Thin ARM REST client.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::Value;

use super::token::TokenSource;
use crate::traits::ControlError;

/// Sends authenticated requests to `{endpoint}{path}?api-version=...`.
pub struct ArmClient {
    http: reqwest::Client,
    endpoint: String,
    token: Arc<dyn TokenSource>,
}

impl ArmClient {
    pub fn new(endpoint: impl Into<String>, token: Arc<dyn TokenSource>) -> Result<Self, ControlError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a request and return the parsed body (`Null` when empty).
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        api_version: &str,
        body: Option<&Value>,
    ) -> Result<Value, ControlError> {
        let url = format!("{}{}", self.endpoint, path);
        let token = self.token.token().await?;

        let mut request = self
            .http
            .request(method.clone(), &url)
            .query(&[("api-version", api_version)])
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get("x-ms-user-quota-resets-after")
            .or_else(|| response.headers().get(reqwest::header::RETRY_AFTER))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await?;

        if !status.is_success() {
            tracing::debug!(%method, path, %status, "ARM request failed");
            return Err(classify(status, &text, retry_after.as_deref()));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ControlError::Decode(format!("{path}: {e}")))
    }

    pub async fn get(&self, path: &str, api_version: &str) -> Result<Value, ControlError> {
        self.send(Method::GET, path, api_version, None).await
    }

    pub async fn post(&self, path: &str, api_version: &str, body: Option<&Value>) -> Result<Value, ControlError> {
        self.send(Method::POST, path, api_version, body).await
    }

    pub async fn patch(&self, path: &str, api_version: &str, body: &Value) -> Result<Value, ControlError> {
        self.send(Method::PATCH, path, api_version, Some(body)).await
    }

    pub async fn put(&self, path: &str, api_version: &str, body: &Value) -> Result<Value, ControlError> {
        self.send(Method::PUT, path, api_version, Some(body)).await
    }
}

/// Map a non-2xx ARM response to an error class.
pub fn classify(status: StatusCode, body: &str, retry_after: Option<&str>) -> ControlError {
    let code = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["code"].as_str().map(str::to_string))
        .unwrap_or_default();
    let detail = match retry_after {
        Some(after) => format!("{status} {code} (retry after {after})"),
        None if code.is_empty() => status.to_string(),
        None => format!("{status} {code}"),
    };

    match status {
        StatusCode::NOT_FOUND => ControlError::NotFound(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ControlError::Auth(detail),
        StatusCode::CONFLICT | StatusCode::TOO_MANY_REQUESTS => ControlError::Retryable(detail),
        s if s.is_server_error() => ControlError::Retryable(detail),
        _ if code == "AnotherOperationInProgress" => ControlError::Retryable(detail),
        _ => ControlError::Fatal(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_and_conflicts_are_retryable() {
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, "", Some("00:00:05")).is_retryable());
        let conflict = r#"{"error":{"code":"AnotherOperationInProgress","message":"busy"}}"#;
        assert!(classify(StatusCode::CONFLICT, conflict, None).is_retryable());
        assert!(classify(StatusCode::BAD_REQUEST, conflict, None).is_retryable());
        assert!(classify(StatusCode::SERVICE_UNAVAILABLE, "", None).is_retryable());
    }

    #[test]
    fn client_errors_are_terminal() {
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, "", None),
            ControlError::NotFound(_)
        ));
        assert!(matches!(classify(StatusCode::FORBIDDEN, "", None), ControlError::Auth(_)));
        let bad = classify(StatusCode::BAD_REQUEST, r#"{"error":{"code":"InvalidParameter"}}"#, None);
        assert!(!bad.is_retryable());
        assert!(bad.to_string().contains("InvalidParameter"));
    }
}
