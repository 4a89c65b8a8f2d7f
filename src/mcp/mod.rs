//! MCP client over the SSE transport.
//!
//! The server pushes messages on a long-lived event stream; the client writes
//! JSON-RPC envelopes as POSTs to the endpoint the stream announces.

pub mod client;
pub mod error;
pub mod events;
pub mod protocol;
pub mod registry;
pub mod timeouts;
pub mod transport;

pub use client::{ConnectionState, McpClient};
pub use error::McpError;
pub use registry::{ToolCatalog, ToolDescriptor};
