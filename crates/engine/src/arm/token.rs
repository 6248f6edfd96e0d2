//! Bearer tokens for ARM.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::traits::ControlError;

const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
/// Refresh this long before the token expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, ControlError>;
}

/// A fixed token, e.g. from `ARM_ACCESS_TOKEN`.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, ControlError> {
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct ImdsToken {
    access_token: String,
    /// Seconds, as a string.
    expires_in: String,
}

/// Managed identity token from the instance metadata endpoint, cached until
/// shortly before expiry.
pub struct ManagedIdentityToken {
    http: reqwest::Client,
    resource: String,
    client_id: Option<String>,
    cached: Mutex<Option<(String, Instant)>>,
}

impl ManagedIdentityToken {
    /// `resource` is the ARM endpoint the token is for.
    pub fn new(resource: impl Into<String>, client_id: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            resource: resource.into(),
            client_id,
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<(String, Instant), ControlError> {
        let resource = format!("{}/", self.resource.trim_end_matches('/'));
        let mut query = vec![("api-version", IMDS_API_VERSION), ("resource", resource.as_str())];
        if let Some(id) = &self.client_id {
            query.push(("client_id", id.as_str()));
        }

        let response = self
            .http
            .get(IMDS_TOKEN_URL)
            .header("Metadata", "true")
            .query(&query)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ControlError::Auth(format!("token endpoint returned {status}: {body}")));
        }

        let token: ImdsToken = response
            .json()
            .await
            .map_err(|e| ControlError::Auth(format!("unreadable token response: {e}")))?;
        let lifetime = token
            .expires_in
            .parse::<u64>()
            .map(Duration::from_secs)
            .unwrap_or(REFRESH_MARGIN);
        let refresh_at = Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN);
        tracing::debug!(lifetime_secs = lifetime.as_secs(), "Fetched managed identity token");
        Ok((token.access_token, refresh_at))
    }
}

#[async_trait]
impl TokenSource for ManagedIdentityToken {
    async fn token(&self) -> Result<String, ControlError> {
        let mut cached = self.cached.lock().await;
        if let Some((token, refresh_at)) = cached.as_ref() {
            if Instant::now() < *refresh_at {
                return Ok(token.clone());
            }
        }
        let (token, refresh_at) = self.fetch().await?;
        *cached = Some((token.clone(), refresh_at));
        Ok(token)
    }
}
