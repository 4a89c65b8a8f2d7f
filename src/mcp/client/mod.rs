//! Connection lifecycle for an MCP server reached over SSE + POST.
//!
//! [`McpClient`] is the only owner of connection state. `connect` and
//! `disconnect` are its sole mutators; everything else reads published
//! snapshots or goes through the engine of the current connection.

use crate::core::config::data::Config;
use crate::mcp::error::McpError;
use crate::mcp::events::ServerNotification;
use crate::mcp::registry::{ToolCatalog, ToolDescriptor};
use crate::mcp::timeouts::TimeoutPolicy;
use crate::mcp::transport::http::{build_http_client, HttpOutbound, Outbound};
use crate::mcp::transport::sse::SseChannel;
use crate::mcp::transport::{resolve_write_endpoint, ChannelEvent};
use rust_mcp_schema::mcp_2024_11_05::InitializeResult;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod correlation;
pub mod engine;
mod operations;

pub use engine::RpcEngine;
pub use operations::MCP_MAX_TOOL_LIST;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Session {
    engine: Arc<RpcEngine>,
    channel: SseChannel,
    pump_cancel: CancellationToken,
    server_info: Option<InitializeResult>,
}

#[derive(Default)]
struct Slot {
    /// Attempt allowed to own the connection; 0 when there is none.
    incarnation: u64,
    session: Option<Session>,
}

struct Shared {
    slot: Mutex<Slot>,
    state: watch::Sender<ConnectionState>,
    tools: watch::Sender<Arc<ToolCatalog>>,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (tools, _) = watch::channel(Arc::new(ToolCatalog::default()));
        Self {
            slot: Mutex::new(Slot::default()),
            state,
            tools,
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Releases the slot's session, empties the catalog and moves to `next`.
    /// Callers hold the slot lock.
    async fn teardown(&self, slot: &mut Slot, next: ConnectionState, reason: &str) {
        slot.incarnation = 0;
        if let Some(session) = slot.session.take() {
            session.pump_cancel.cancel();
            session.channel.close();
            session
                .engine
                .shutdown(McpError::ConnectionLost(reason.to_string()))
                .await;
        }
        self.tools.send_replace(Arc::new(ToolCatalog::default()));
        self.state.send_replace(next);
    }

    /// Moves a ready connection to `error`. Does nothing if `incarnation` is no
    /// longer current or the connection never reached ready.
    async fn fail_ready(&self, incarnation: u64, error: &McpError) {
        let mut slot = self.slot.lock().await;
        if slot.incarnation != incarnation || self.current_state() != ConnectionState::Ready {
            return;
        }
        warn!(error = %error, "MCP connection failed");
        self.teardown(&mut slot, ConnectionState::Error, &error.to_string())
            .await;
    }

    async fn is_ready(&self, incarnation: u64) -> bool {
        let slot = self.slot.lock().await;
        slot.incarnation == incarnation && self.current_state() == ConnectionState::Ready
    }
}

pub struct McpClient {
    http: reqwest::Client,
    outbound: Arc<dyn Outbound>,
    timeouts: TimeoutPolicy,
    shared: Arc<Shared>,
    connect_gate: Mutex<()>,
    incarnations: AtomicU64,
    notification_tx: Option<mpsc::UnboundedSender<ServerNotification>>,
}

impl McpClient {
    pub fn new(timeouts: TimeoutPolicy) -> Result<Self, McpError> {
        Ok(Self::with_http_client(build_http_client()?, timeouts))
    }

    pub fn from_config(config: &Config) -> Result<Self, McpError> {
        Self::new(TimeoutPolicy::from_config(config))
    }

    pub fn with_http_client(http: reqwest::Client, timeouts: TimeoutPolicy) -> Self {
        let outbound: Arc<dyn Outbound> = Arc::new(HttpOutbound::new(http.clone()));
        Self {
            http,
            outbound,
            timeouts,
            shared: Arc::new(Shared::new()),
            connect_gate: Mutex::new(()),
            incarnations: AtomicU64::new(0),
            notification_tx: None,
        }
    }

    /// Server-initiated requests and notifications are forwarded here for
    /// observation. Applies from the next `connect`.
    pub fn set_notification_sender(&mut self, sender: mpsc::UnboundedSender<ServerNotification>) {
        self.notification_tx = Some(sender);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.current_state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// The current tool catalog; empty unless ready.
    pub fn tools(&self) -> Arc<ToolCatalog> {
        self.shared.tools.borrow().clone()
    }

    pub fn subscribe_tools(&self) -> watch::Receiver<Arc<ToolCatalog>> {
        self.shared.tools.subscribe()
    }

    pub async fn server_info(&self) -> Option<InitializeResult> {
        let slot = self.shared.slot.lock().await;
        slot.session
            .as_ref()
            .and_then(|session| session.server_info.clone())
    }

    pub async fn write_endpoint(&self) -> Option<String> {
        let engine = {
            let slot = self.shared.slot.lock().await;
            slot.session.as_ref().map(|session| session.engine.clone())
        };
        match engine {
            Some(engine) => engine.write_endpoint().await,
            None => None,
        }
    }

    /// Opens the push channel at `address`, waits for the write endpoint and
    /// runs the handshake. Any existing connection or attempt is torn down first.
    pub async fn connect(&self, address: &str) -> Result<(), McpError> {
        // Cancel first so a stalled attempt cannot keep the gate.
        self.abandon_current("Superseded by a new connection.").await;
        let _gate = self.connect_gate.lock().await;

        let incarnation = self.incarnations.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut slot = self.shared.slot.lock().await;
            if slot.session.is_some() || slot.incarnation != 0 {
                self.shared
                    .teardown(
                        &mut slot,
                        ConnectionState::Disconnected,
                        "Superseded by a new connection.",
                    )
                    .await;
            }
            slot.incarnation = incarnation;
            self.shared.state.send_replace(ConnectionState::Connecting);
        }

        info!(address = %address, "Connecting to MCP server");
        match self.establish(address, incarnation).await {
            Ok(()) => {
                info!(
                    address = %address,
                    tools = self.tools().len(),
                    "MCP connection ready"
                );
                Ok(())
            }
            Err(err) => {
                let mut slot = self.shared.slot.lock().await;
                if slot.incarnation == incarnation {
                    warn!(address = %address, error = %err, "MCP connection attempt failed");
                    self.shared
                        .teardown(&mut slot, ConnectionState::Error, &err.to_string())
                        .await;
                }
                Err(err)
            }
        }
    }

    async fn abandon_current(&self, reason: &str) {
        let mut slot = self.shared.slot.lock().await;
        if slot.session.is_some() || slot.incarnation != 0 {
            self.shared
                .teardown(&mut slot, ConnectionState::Disconnected, reason)
                .await;
        }
    }

    async fn establish(&self, address: &str, incarnation: u64) -> Result<(), McpError> {
        // One deadline covers the stream response headers and the announcement.
        let deadline = tokio::time::Instant::now() + self.timeouts.endpoint;
        let endpoint_timeout = || McpError::Timeout {
            method: "endpoint announcement".to_string(),
            after: self.timeouts.endpoint,
        };

        let (channel, events) =
            match tokio::time::timeout_at(deadline, SseChannel::open(&self.http, address)).await {
                Ok(opened) => opened?,
                Err(_) => return Err(endpoint_timeout()),
            };
        let engine = Arc::new(RpcEngine::new(
            self.outbound.clone(),
            self.timeouts.clone(),
            self.notification_tx.clone(),
        ));
        let pump_cancel = CancellationToken::new();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();

        {
            let mut slot = self.shared.slot.lock().await;
            if slot.incarnation != incarnation {
                channel.close();
                return Err(McpError::ConnectionLost(
                    "Connection attempt was cancelled.".to_string(),
                ));
            }
            slot.session = Some(Session {
                engine: engine.clone(),
                channel,
                pump_cancel: pump_cancel.clone(),
                server_info: None,
            });
        }

        tokio::spawn(pump_events(
            Pump {
                shared: self.shared.clone(),
                engine: engine.clone(),
                push_url: address.to_string(),
                incarnation,
                cancel: pump_cancel,
                endpoint_tx: Some(endpoint_tx),
            },
            events,
        ));

        let endpoint = match tokio::time::timeout_at(deadline, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint?,
            Ok(Err(_)) => {
                return Err(McpError::ConnectionLost(
                    "Event stream ended before announcing an endpoint.".to_string(),
                ))
            }
            Err(_) => return Err(endpoint_timeout()),
        };
        info!(endpoint = %endpoint, "MCP write endpoint announced");

        let (server_info, catalog) = operations::run_handshake(&engine).await?;

        let mut slot = self.shared.slot.lock().await;
        if slot.incarnation != incarnation || engine.is_shut_down().await {
            return Err(McpError::ConnectionLost(
                "Connection closed during handshake.".to_string(),
            ));
        }
        if let Some(session) = slot.session.as_mut() {
            session.server_info = Some(server_info);
        }
        self.shared.tools.send_replace(Arc::new(catalog));
        self.shared.state.send_replace(ConnectionState::Ready);
        Ok(())
    }

    /// Closes the connection from any state. Pending calls fail with
    /// [`McpError::ConnectionLost`].
    pub async fn disconnect(&self) {
        let mut slot = self.shared.slot.lock().await;
        let had_connection = slot.session.is_some() || slot.incarnation != 0;
        self.shared
            .teardown(
                &mut slot,
                ConnectionState::Disconnected,
                "Disconnected by client.",
            )
            .await;
        if had_connection {
            info!("Disconnected from MCP server");
        }
    }

    async fn active(&self) -> Result<(u64, Arc<RpcEngine>, Arc<ToolCatalog>), McpError> {
        let slot = self.shared.slot.lock().await;
        match (&slot.session, self.shared.current_state()) {
            (Some(session), ConnectionState::Ready) => Ok((
                slot.incarnation,
                session.engine.clone(),
                self.shared.tools.borrow().clone(),
            )),
            _ => Err(McpError::NotConnected),
        }
    }

    /// Calls a discovered tool. Names missing from the catalog and arguments
    /// that violate the tool's schema fail locally.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let (incarnation, engine, catalog) = self.active().await?;
        let tool = catalog
            .get(name)
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;
        tool.validate_arguments(&arguments)?;

        let result = operations::call_tool(&engine, name, arguments).await;
        if let Err(err) = &result {
            if err.is_transport() {
                self.shared.fail_ready(incarnation, err).await;
            }
        }
        result
    }

    /// Re-lists tools and replaces the catalog.
    pub async fn refresh(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let (incarnation, engine, _) = self.active().await?;
        let catalog = match operations::list_tools(&engine).await {
            Ok(catalog) => catalog,
            Err(err) => {
                if err.is_transport() {
                    self.shared.fail_ready(incarnation, &err).await;
                }
                return Err(err);
            }
        };

        let tools = catalog.tools().to_vec();
        let slot = self.shared.slot.lock().await;
        if slot.incarnation != incarnation || self.shared.current_state() != ConnectionState::Ready
        {
            return Err(McpError::NotConnected);
        }
        self.shared.tools.send_replace(Arc::new(catalog));
        debug!(count = tools.len(), "Refreshed MCP tool catalog");
        Ok(tools)
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.shared.slot.try_lock() {
            if let Some(session) = slot.session.take() {
                session.pump_cancel.cancel();
                session.channel.close();
            }
        }
    }
}

/// Reads channel events for one connection and feeds the engine.
struct Pump {
    shared: Arc<Shared>,
    engine: Arc<RpcEngine>,
    push_url: String,
    incarnation: u64,
    cancel: CancellationToken,
    endpoint_tx: Option<oneshot::Sender<Result<String, McpError>>>,
}

async fn pump_events(mut pump: Pump, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
    loop {
        let event = tokio::select! {
            _ = pump.cancel.cancelled() => return,
            event = events.recv() => event,
        };
        match event.unwrap_or_else(|| ChannelEvent::Closed("Event stream reader stopped.".to_string())) {
            ChannelEvent::Opened => debug!(url = %pump.push_url, "MCP event stream opened"),
            ChannelEvent::Endpoint(raw) => pump.on_endpoint(&raw).await,
            ChannelEvent::Message(payload) => pump.on_message(&payload).await,
            ChannelEvent::Closed(reason) => {
                pump.on_closed(reason).await;
                return;
            }
        }
    }
}

impl Pump {
    async fn on_endpoint(&mut self, raw: &str) {
        match resolve_write_endpoint(&self.push_url, raw) {
            Ok(url) => {
                let previous = self.engine.set_write_endpoint(url.clone()).await;
                match self.endpoint_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(Ok(url));
                    }
                    None if previous.as_deref() != Some(url.as_str()) => {
                        info!(endpoint = %url, "MCP write endpoint re-announced");
                    }
                    None => {}
                }
            }
            Err(err) => match self.endpoint_tx.take() {
                Some(tx) => {
                    let _ = tx.send(Err(err));
                }
                None => warn!(error = %err, "Ignoring invalid MCP endpoint announcement"),
            },
        }
    }

    /// Malformed payloads are logged once ready; before that they end the attempt.
    async fn on_message(&mut self, payload: &str) {
        let Err(err) = self.engine.dispatch(payload).await else {
            return;
        };
        if self.shared.is_ready(self.incarnation).await {
            warn!(error = %err, "Ignoring malformed MCP message");
            return;
        }
        warn!(error = %err, "Malformed MCP message during handshake");
        if let Some(tx) = self.endpoint_tx.take() {
            let _ = tx.send(Err(err.clone()));
        }
        self.engine.shutdown(err).await;
    }

    async fn on_closed(&mut self, reason: String) {
        debug!(reason = %reason, "MCP event stream closed");
        if let Some(tx) = self.endpoint_tx.take() {
            let _ = tx.send(Err(McpError::Transport(reason.clone())));
        }
        let error = McpError::ConnectionLost(reason);
        self.engine.shutdown(error.clone()).await;
        self.shared.fail_ready(self.incarnation, &error).await;
    }
}
