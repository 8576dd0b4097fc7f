//! Remote object resolution
//!
//! Fetches ActivityPub objects by URL and decodes them into [`ApObject`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::error::FederationError;
use super::objects::{ACTIVITY_JSON, ApObject, ApReference};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of remote ActivityPub objects
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectResolver: Send + Sync {
    /// Fetch and decode the object at `url`
    async fn resolve(&self, url: &str) -> Result<ApObject, FederationError>;
}

/// Resolver that dereferences URLs over HTTP
pub struct HttpObjectResolver {
    client: reqwest::Client,
}

impl HttpObjectResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectResolver for HttpObjectResolver {
    async fn resolve(&self, url: &str) -> Result<ApObject, FederationError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| FederationError::ResolutionFailure(format!("invalid URL {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FederationError::ResolutionFailure(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        tracing::debug!(url, "Resolving remote object");

        let response = self
            .client
            .get(parsed)
            .header(reqwest::header::ACCEPT, ACTIVITY_JSON)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| FederationError::ResolutionFailure(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FederationError::ResolutionFailure(format!(
                "{} returned {}",
                url, status
            )));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| FederationError::ResolutionFailure(format!("{}: {}", url, e)))?;

        ApObject::from_value(value)
    }
}

/// Resolve a reference that may already carry the embedded object
pub async fn resolve_reference(
    resolver: &dyn ObjectResolver,
    reference: &ApReference,
) -> Result<ApObject, FederationError> {
    match reference {
        ApReference::Link(url) => resolver.resolve(url).await,
        ApReference::Object(object) => ApObject::from_value(object.as_ref().clone()),
    }
}
