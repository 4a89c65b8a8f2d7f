//! Failure taxonomy surfaced by the MCP client.

pub use rust_mcp_schema::mcp_2024_11_05::RpcError;
use std::fmt;
use std::time::Duration;

/// Errors returned by the transport, the RPC engine and the connection lifecycle.
#[derive(Debug, Clone)]
pub enum McpError {
    /// The push channel closed or errored, or an outbound POST was rejected.
    Transport(String),
    /// No reply arrived before the request deadline.
    Timeout {
        method: String,
        after: Duration,
    },
    /// The server answered with an `error` member.
    Remote(RpcError),
    /// An inbound payload could not be parsed, or a handshake step returned
    /// an unexpected shape.
    Protocol(String),
    /// The client is not in the ready state.
    NotConnected,
    /// The tool is absent from the discovered catalog.
    UnknownTool(String),
    /// Arguments do not satisfy the tool's declared parameter schema.
    InvalidArguments { tool: String, reason: String },
    /// The owning connection was torn down while the call was pending.
    ConnectionLost(String),
}

impl McpError {
    /// True for failures that mean the connection itself is unusable.
    pub fn is_transport(&self) -> bool {
        matches!(self, McpError::Transport(_) | McpError::ConnectionLost(_))
    }
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpError::Transport(msg) => write!(f, "Transport error: {msg}"),
            McpError::Timeout { method, after } => {
                write!(
                    f,
                    "Request {method} timed out after {}s",
                    after.as_secs_f64()
                )
            }
            McpError::Remote(error) => format_rpc_error(f, error),
            McpError::Protocol(msg) => write!(f, "Protocol error: {msg}"),
            McpError::NotConnected => write!(f, "MCP client not connected."),
            McpError::UnknownTool(name) => write!(f, "Unknown tool: {name}"),
            McpError::InvalidArguments { tool, reason } => {
                write!(f, "Invalid arguments for {tool}: {reason}")
            }
            McpError::ConnectionLost(reason) => write!(f, "Connection lost: {reason}"),
        }
    }
}

impl std::error::Error for McpError {}

fn format_rpc_error(f: &mut fmt::Formatter<'_>, error: &RpcError) -> fmt::Result {
    write!(f, "Remote error {}: {}", error.code, error.message)?;
    if let Some(data) = &error.data {
        write!(f, " ({data})")?;
    }
    Ok(())
}
