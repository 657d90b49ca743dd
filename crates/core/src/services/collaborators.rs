//! External collaborator interfaces.
//!
//! The parser turns a URL into normalized fields; the push renderer posts a
//! content to a chat. Implementations live in the queue crate (HTTP) and in
//! tests (in-memory fakes).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fanout_db::entities::content;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Failure taxonomy shared by every collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Credentials expired or insufficient. Needs a human.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// Bad input or the resource is gone.
    #[error("non-retryable error: {0}")]
    NonRetryable(String),

    /// Transient upstream or network failure.
    #[error("retryable error: {0}")]
    Retryable(String),
}

impl CollaboratorError {
    /// Machine-readable classification.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AuthRequired(_) => "auth_required",
            Self::NonRetryable(_) => "non_retryable",
            Self::Retryable(_) => "retryable",
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Parser output. Every field is optional except the lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizedContent {
    pub title: Option<String>,
    pub body: Option<String>,
    pub cover_url: Option<String>,
    pub media_urls: Vec<String>,
    pub author_name: Option<String>,
    pub author_id: Option<String>,
    pub author_url: Option<String>,
    /// Tags found by the parser, merged into the stored tags.
    pub tags: Vec<String>,
    /// Overrides the stored flag when present.
    pub is_nsfw: Option<bool>,
    pub stats: serde_json::Value,
    pub published_at: Option<DateTime<Utc>>,
}

/// Where a push goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushTarget {
    /// Chat platform.
    pub platform: String,
    /// Chat id after NSFW routing.
    pub chat_id: String,
    /// Per-target render overrides.
    pub render_config: Option<serde_json::Value>,
}

/// Content parser.
#[async_trait]
pub trait Parser: Send + Sync {
    /// Parse a URL of the given platform.
    async fn parse(&self, url: &str, platform: &str) -> Result<NormalizedContent, CollaboratorError>;
}

/// Push renderer.
#[async_trait]
pub trait PushRenderer: Send + Sync {
    /// Post one content. Returns the delivery id.
    async fn push(
        &self,
        content: &content::Model,
        target: &PushTarget,
    ) -> Result<String, CollaboratorError>;

    /// Post several contents as one forwarded message. Returns the delivery id.
    async fn push_batch(
        &self,
        contents: &[content::Model],
        target: &PushTarget,
    ) -> Result<String, CollaboratorError>;
}

pub type ParserService = Arc<dyn Parser>;
pub type PushRendererService = Arc<dyn PushRenderer>;
