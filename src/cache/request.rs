//! Requests and the external documentation-fetch seam.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::keys::{DocKey, build_key};

/// A documentation lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocRequest {
    pub library_id: String,
    #[serde(default)]
    pub topic: String,
    pub token_budget: u32,
    /// Extra request context folded into the key as a short hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl DocRequest {
    pub fn new(library_id: impl Into<String>, topic: impl Into<String>, token_budget: u32) -> Self {
        Self {
            library_id: library_id.into(),
            topic: topic.into(),
            token_budget,
            context: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn key(&self) -> DocKey {
        build_key(
            &self.library_id,
            &self.topic,
            self.token_budget,
            self.context.as_ref(),
        )
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no documentation for `{library_id}`")]
    NotFound { library_id: String },
    #[error("documentation fetch failed: {0}")]
    Failed(String),
}

/// The remote documentation service, called on a miss.
#[async_trait]
pub trait DocFetcher: Send + Sync {
    async fn fetch(&self, request: &DocRequest) -> Result<Bytes, FetchError>;
}

/// Outcome of [`super::DocsCache::warm`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    /// Requests already present in a tier.
    pub cached: usize,
    /// Requests fetched and written.
    pub fetched: usize,
    /// Requests whose fetch failed.
    pub failed: usize,
}
