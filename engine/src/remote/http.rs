//! HTTP transport for the remote record service.
//!
//! Routes:
//! - `GET  /owners/{owner}/records` - list
//! - `POST /owners/{owner}/records` - create
//! - `GET | PUT | DELETE /records/{id}`

use super::{RecordDraft, RecordPatch, RemoteClient, RemoteRecord};
use crate::error::RemoteError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use std::time::Duration;

/// Default per-request timeout. A hung call holds the engine's run guard, so
/// the bound lives here.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// [`RemoteClient`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    http: Client,
    base_url: Url,
}

impl HttpRemoteClient {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RemoteError::Other(format!("invalid base url {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Other(format!(
                "base url cannot carry a path: {base_url}"
            )));
        }
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    /// Base URL with path segments appended (each percent-encoded).
    fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Other("base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Map non-success statuses onto [`RemoteError`].
    async fn check(response: Response, id: &str) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => RemoteError::NotFound(id.to_string()),
            StatusCode::CONFLICT => RemoteError::Conflict(body),
            _ => RemoteError::Other(format!("{status}: {body}")),
        })
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn create(&self, draft: &RecordDraft) -> Result<RemoteRecord, RemoteError> {
        let url = self.url(&["owners", &draft.owner_id, "records"])?;
        let response = self.http.post(url).json(draft).send().await?;
        Ok(Self::check(response, "").await?.json().await?)
    }

    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<RemoteRecord, RemoteError> {
        let url = self.url(&["records", id])?;
        let response = self.http.put(url).json(patch).send().await?;
        Ok(Self::check(response, id).await?.json().await?)
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        let url = self.url(&["records", id])?;
        let response = self.http.delete(url).send().await?;
        Self::check(response, id).await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<RemoteRecord, RemoteError> {
        let url = self.url(&["records", id])?;
        let response = self.http.get(url).send().await?;
        Ok(Self::check(response, id).await?.json().await?)
    }

    async fn list(&self, owner: &str) -> Result<Vec<RemoteRecord>, RemoteError> {
        let url = self.url(&["owners", owner, "records"])?;
        let response = self.http.get(url).send().await?;
        Ok(Self::check(response, owner).await?.json().await?)
    }
}
