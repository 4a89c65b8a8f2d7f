use super::MCP_JSON_CONTENT_TYPE;
use crate::mcp::error::McpError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const MCP_HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const MCP_HTTP_POOL_MAX_IDLE_PER_HOST: usize = 8;
const MCP_HTTP_POST_TIMEOUT_SECONDS: u64 = 30;

/// Builds the shared client. No overall timeout is set here because the
/// same client holds the push stream open; POSTs carry their own.
pub fn build_http_client() -> Result<reqwest::Client, McpError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(MCP_HTTP_CONNECT_TIMEOUT_SECONDS))
        .pool_idle_timeout(Duration::from_secs(MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS))
        .pool_max_idle_per_host(MCP_HTTP_POOL_MAX_IDLE_PER_HOST)
        .build()
        .map_err(|err| McpError::Transport(format!("Failed to build HTTP client: {err}")))
}

pub fn apply_json_post_headers(request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    request.header(reqwest::header::CONTENT_TYPE, MCP_JSON_CONTENT_TYPE)
}

/// Client-to-server write path.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Delivers one serialized envelope. Replies never come back on this path.
    async fn post(&self, url: &str, body: String) -> Result<(), McpError>;
}

pub struct HttpOutbound {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpOutbound {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(MCP_HTTP_POST_TIMEOUT_SECONDS),
        }
    }
}

#[async_trait]
impl Outbound for HttpOutbound {
    async fn post(&self, url: &str, body: String) -> Result<(), McpError> {
        debug!(url = %url, bytes = body.len(), "Posting MCP message");
        let response = apply_json_post_headers(self.client.post(url))
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|err| McpError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Transport(format!("HTTP error: {status}")));
        }
        Ok(())
    }
}
