//! Transport pieces for the SSE + POST flavour of MCP.
//!
//! The server pushes every message over one long-lived event stream and, right
//! after the stream opens, announces the address the client must POST its own
//! messages to. Nothing at this layer pairs requests with replies; that is the
//! engine's job.

use crate::mcp::error::McpError;
use reqwest::Url;

pub mod http;
pub mod sse;

pub const MCP_JSON_CONTENT_TYPE: &str = "application/json";
pub const MCP_EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// SSE event type whose payload is the write endpoint, as plain text.
pub const ENDPOINT_EVENT: &str = "endpoint";
/// Default SSE event type; carries JSON-RPC envelopes.
pub const MESSAGE_EVENT: &str = "message";

/// What the push channel reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    /// The raw, unresolved write endpoint announced by the server.
    Endpoint(String),
    /// A raw message payload.
    Message(String),
    /// The stream ended or failed; no further events follow.
    Closed(String),
}

/// Resolves an announced write endpoint against the push channel address.
///
/// Absolute http(s) announcements are used as-is. Relative ones resolve against
/// the push URL's origin and the directory part of its path, so `msg` announced
/// on `http://h/base/sse` becomes `http://h/base/msg`.
pub fn resolve_write_endpoint(push_url: &str, announced: &str) -> Result<String, McpError> {
    let announced = announced.trim();
    if announced.is_empty() {
        return Err(McpError::Protocol("Empty endpoint announcement.".to_string()));
    }

    if let Ok(url) = Url::parse(announced) {
        if matches!(url.scheme(), "http" | "https") {
            return Ok(url.to_string());
        }
    }

    let mut base = Url::parse(push_url)
        .map_err(|err| McpError::Transport(format!("Invalid push URL {push_url}: {err}")))?;
    let directory = {
        let path = base.path();
        let cut = path.rfind('/').map_or(0, |index| index + 1);
        path[..cut].to_string()
    };
    base.set_path(&directory);
    base.set_query(None);
    base.set_fragment(None);

    base.join(announced)
        .map(|url| url.to_string())
        .map_err(|err| McpError::Protocol(format!("Invalid endpoint {announced}: {err}")))
}

/// Returns true for `text/event-stream`, ignoring parameters and case.
pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case(MCP_EVENT_STREAM_CONTENT_TYPE))
}
