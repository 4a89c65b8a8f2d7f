//! Toolwire is a Model Context Protocol client for servers that use the SSE
//! transport.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`mcp`] owns the protocol: the event-stream channel and POST writer in
//!   [`mcp::transport`], envelope shapes in [`mcp::protocol`], and the
//!   connection lifecycle, request correlation and tool catalog in
//!   [`mcp::client`] and [`mcp::registry`].
//! - [`core`] holds the persisted configuration.
//! - [`cli`] parses arguments and drives one connection per invocation.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod cli;
pub mod core;
pub mod logging;
pub mod mcp;
