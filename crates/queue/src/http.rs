//! HTTP bridges to the external parser and push renderer.

use std::time::Duration;

use async_trait::async_trait;
use fanout_common::config::CollaboratorConfig;
use fanout_common::{AppError, AppResult};
use fanout_core::services::{
    CollaboratorError, NormalizedContent, Parser, PushRenderer, PushTarget,
};
use fanout_db::entities::content;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Map a non-success status to the collaborator taxonomy.
#[must_use]
pub fn classify_status(status: StatusCode, body: &str) -> CollaboratorError {
    let message = format!("{status}: {}", body.trim());
    match status.as_u16() {
        401 | 403 => CollaboratorError::AuthRequired(message),
        408 | 429 => CollaboratorError::Retryable(message),
        400..=499 => CollaboratorError::NonRetryable(message),
        _ => CollaboratorError::Retryable(message),
    }
}

fn transport_error(e: &reqwest::Error) -> CollaboratorError {
    if e.is_decode() {
        CollaboratorError::NonRetryable(format!("invalid response: {e}"))
    } else {
        CollaboratorError::Retryable(format!("request failed: {e}"))
    }
}

fn build_client(config: &CollaboratorConfig) -> AppResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(&config.user_agent)
        .build()
        .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))
}

async fn post_json<B, R>(client: &Client, url: &str, body: &B) -> Result<R, CollaboratorError>
where
    B: Serialize + Sync + ?Sized,
    R: DeserializeOwned,
{
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| transport_error(&e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &body));
    }

    response.json().await.map_err(|e| transport_error(&e))
}

#[derive(Serialize)]
struct ParseRequest<'a> {
    url: &'a str,
    platform: &'a str,
}

/// Parser reached over HTTP: `POST {parser_url}/parse`.
#[derive(Clone)]
pub struct HttpParser {
    client: Client,
    endpoint: String,
}

impl HttpParser {
    /// Create a parser client.
    pub fn new(config: &CollaboratorConfig) -> AppResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            endpoint: format!("{}/parse", config.parser_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Parser for HttpParser {
    async fn parse(&self, url: &str, platform: &str) -> Result<NormalizedContent, CollaboratorError> {
        debug!(url = %url, platform = %platform, "Requesting parse");
        post_json(&self.client, &self.endpoint, &ParseRequest { url, platform }).await
    }
}

#[derive(Serialize)]
struct PushRequest<'a> {
    content: &'a content::Model,
    target: &'a PushTarget,
}

#[derive(Serialize)]
struct PushBatchRequest<'a> {
    contents: &'a [content::Model],
    target: &'a PushTarget,
}

#[derive(Deserialize)]
struct PushResponse {
    message_id: String,
}

/// Push renderer reached over HTTP: `POST {renderer_url}/push` and
/// `POST {renderer_url}/push_batch`.
#[derive(Clone)]
pub struct HttpPushRenderer {
    client: Client,
    base_url: String,
}

impl HttpPushRenderer {
    /// Create a renderer client.
    pub fn new(config: &CollaboratorConfig) -> AppResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.renderer_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PushRenderer for HttpPushRenderer {
    async fn push(
        &self,
        content: &content::Model,
        target: &PushTarget,
    ) -> Result<String, CollaboratorError> {
        let url = format!("{}/push", self.base_url);
        let response: PushResponse =
            post_json(&self.client, &url, &PushRequest { content, target }).await?;
        Ok(response.message_id)
    }

    async fn push_batch(
        &self,
        contents: &[content::Model],
        target: &PushTarget,
    ) -> Result<String, CollaboratorError> {
        let url = format!("{}/push_batch", self.base_url);
        let response: PushResponse =
            post_json(&self.client, &url, &PushBatchRequest { contents, target }).await?;
        Ok(response.message_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, "").kind(),
            "auth_required"
        );
        assert_eq!(classify_status(StatusCode::FORBIDDEN, "").kind(), "auth_required");
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND,
            StatusCode::GONE,
            StatusCode::UNPROCESSABLE_ENTITY,
        ] {
            assert_eq!(classify_status(status, "").kind(), "non_retryable");
        }
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(classify_status(status, "").is_retryable());
        }
    }

    #[test]
    fn test_classify_keeps_body() {
        let error = classify_status(StatusCode::NOT_FOUND, " post deleted \n");
        assert_eq!(
            error,
            CollaboratorError::NonRetryable("404 Not Found: post deleted".to_string())
        );
    }

    #[test]
    fn test_endpoints() {
        let config = CollaboratorConfig {
            parser_url: "http://parser:8000/".to_string(),
            renderer_url: "http://renderer:8001".to_string(),
            timeout_secs: 5,
            user_agent: "fanout-test".to_string(),
        };
        assert_eq!(HttpParser::new(&config).unwrap().endpoint, "http://parser:8000/parse");
        assert_eq!(
            HttpPushRenderer::new(&config).unwrap().base_url,
            "http://renderer:8001"
        );
    }
}
