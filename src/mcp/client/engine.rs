use super::correlation::{CorrelationTable, Reply};
use crate::mcp::error::McpError;
use crate::mcp::events::ServerNotification;
use crate::mcp::protocol::{parse_inbound, Inbound, NotificationEnvelope, RequestEnvelope};
use crate::mcp::timeouts::TimeoutPolicy;
use crate::mcp::transport::http::Outbound;
use rust_mcp_schema::mcp_2024_11_05::schema_utils::ServerMessage;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, warn};

/// Request/response engine for one connection incarnation.
///
/// Outbound envelopes go out as POSTs to the write endpoint; replies come back
/// through [`RpcEngine::dispatch`], fed by whoever reads the push channel.
pub struct RpcEngine {
    outbound: Arc<dyn Outbound>,
    write_endpoint: RwLock<Option<String>>,
    next_request_id: AtomicI64,
    pending: CorrelationTable,
    timeouts: TimeoutPolicy,
    notification_tx: Option<mpsc::UnboundedSender<ServerNotification>>,
}

impl RpcEngine {
    pub fn new(
        outbound: Arc<dyn Outbound>,
        timeouts: TimeoutPolicy,
        notification_tx: Option<mpsc::UnboundedSender<ServerNotification>>,
    ) -> Self {
        Self {
            outbound,
            write_endpoint: RwLock::new(None),
            next_request_id: AtomicI64::new(0),
            pending: CorrelationTable::new(),
            timeouts,
            notification_tx,
        }
    }

    /// Stores the resolved write endpoint and returns the one it replaced.
    pub async fn set_write_endpoint(&self, url: String) -> Option<String> {
        self.write_endpoint.write().await.replace(url)
    }

    pub async fn write_endpoint(&self) -> Option<String> {
        self.write_endpoint.read().await.clone()
    }

    async fn require_write_endpoint(&self) -> Result<String, McpError> {
        self.write_endpoint()
            .await
            .ok_or_else(|| McpError::Transport("No write endpoint announced.".to_string()))
    }

    fn next_request_id(&self) -> i64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Sends a request and waits for its reply, the deadline, or a teardown.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let endpoint = self.require_write_endpoint().await?;
        let request_id = self.next_request_id();
        let timeout = self.timeouts.for_method(method);
        let deadline = tokio::time::Instant::now() + timeout;

        let payload = serde_json::to_string(&RequestEnvelope::new(
            request_id,
            method,
            params.as_ref(),
        ))
        .map_err(|err| McpError::Protocol(err.to_string()))?;

        let mut rx = self.pending.register(request_id).await?;
        debug!(request_id, method = %method, "Sending MCP request");

        let posted = tokio::time::timeout_at(deadline, self.outbound.post(&endpoint, payload)).await;
        match posted {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.pending.expire(request_id).await;
                debug!(request_id, error = %err, "MCP request POST failed");
                return Err(err);
            }
            Err(_) => return self.expire_or_take(request_id, method, timeout, rx).await,
        }

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(McpError::ConnectionLost(
                "Reply slot dropped.".to_string(),
            )),
            Err(_) => self.expire_or_take(request_id, method, timeout, rx).await,
        }
    }

    /// Settles a request whose deadline passed. A reply or teardown that
    /// claimed the entry first wins; its value is already in the slot.
    async fn expire_or_take(
        &self,
        request_id: i64,
        method: &str,
        timeout: Duration,
        rx: oneshot::Receiver<Reply>,
    ) -> Reply {
        if self.pending.expire(request_id).await {
            debug!(request_id, method = %method, "MCP request timed out");
            return Err(McpError::Timeout {
                method: method.to_string(),
                after: timeout,
            });
        }
        rx.await
            .unwrap_or_else(|_| Err(McpError::ConnectionLost("Reply slot dropped.".to_string())))
    }

    /// Fires a notification. Returns once the POST completes; nothing is awaited
    /// from the server.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), McpError> {
        let endpoint = self.require_write_endpoint().await?;
        let payload = serde_json::to_string(&NotificationEnvelope::new(method, params.as_ref()))
            .map_err(|err| McpError::Protocol(err.to_string()))?;
        debug!(method = %method, "Sending MCP notification");
        self.outbound.post(&endpoint, payload).await
    }

    /// Routes one push-channel payload. Replies resolve their pending entry;
    /// everything else is observed only. A malformed reply that still names a
    /// pending id fails that request with the protocol error. The first
    /// malformed item is returned after the whole payload has been routed.
    pub async fn dispatch(&self, payload: &str) -> Result<(), McpError> {
        let mut first_error = None;
        for inbound in parse_inbound(payload)? {
            match inbound {
                Inbound::Message {
                    reply_id,
                    message,
                    raw,
                } => self.route(reply_id, message, raw).await,
                Inbound::Malformed { reply_id, error } => {
                    if let Some(id) = reply_id {
                        if self.pending.resolve(id, Err(error.clone())).await {
                            warn!(response_id = id, error = %error, "Failed MCP request on malformed reply");
                        }
                    }
                    first_error.get_or_insert(error);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn route(&self, reply_id: Option<i64>, message: ServerMessage, mut raw: Value) {
        let reply = match message {
            ServerMessage::Response(_) => Ok(raw
                .get_mut("result")
                .map(Value::take)
                .unwrap_or(Value::Null)),
            ServerMessage::Error(error) => Err(McpError::Remote(error.error)),
            ServerMessage::Request(_) | ServerMessage::Notification(_) => {
                let notification = ServerNotification::from_raw(raw);
                debug!(
                    method = %notification.method,
                    request_id = ?notification.request_id,
                    "Received MCP server message"
                );
                self.observe(notification);
                return;
            }
        };

        let Some(id) = reply_id else {
            warn!(reply = ?reply, "Received MCP response without a usable id");
            return;
        };
        if self.pending.resolve(id, reply).await {
            debug!(response_id = id, "Received MCP response");
        } else {
            debug!(response_id = id, "Dropping MCP response with no pending request");
        }
    }

    fn observe(&self, notification: ServerNotification) {
        if let Some(tx) = self.notification_tx.as_ref() {
            let _ = tx.send(notification);
        }
    }

    /// Fails all in-flight requests with `error`; later requests fail the same way.
    pub async fn shutdown(&self, error: McpError) -> usize {
        let drained = self.pending.clear(error).await;
        if drained > 0 {
            debug!(drained, "Failed pending MCP requests on shutdown");
        }
        drained
    }

    pub async fn is_shut_down(&self) -> bool {
        self.pending.is_closed().await
    }

    #[cfg(test)]
    pub(crate) async fn pending_requests(&self) -> usize {
        self.pending.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingOutbound {
        posted: Mutex<Vec<(String, String)>>,
        reject: bool,
    }

    #[async_trait]
    impl Outbound for RecordingOutbound {
        async fn post(&self, url: &str, body: String) -> Result<(), McpError> {
            self.posted.lock().await.push((url.to_string(), body));
            if self.reject {
                return Err(McpError::Transport("HTTP error: 500".to_string()));
            }
            Ok(())
        }
    }

    /// Accepts the POST but never answers it.
    struct StallingOutbound;

    #[async_trait]
    impl Outbound for StallingOutbound {
        async fn post(&self, _url: &str, _body: String) -> Result<(), McpError> {
            tokio::time::sleep(Duration::from_secs(20)).await;
            Ok(())
        }
    }

    async fn engine_with(outbound: Arc<dyn Outbound>, timeouts: TimeoutPolicy) -> Arc<RpcEngine> {
        let engine = Arc::new(RpcEngine::new(outbound, timeouts, None));
        engine
            .set_write_endpoint("http://h/rpc".to_string())
            .await;
        engine
    }

    async fn wait_for_posts(outbound: &RecordingOutbound, count: usize) -> Vec<Value> {
        loop {
            {
                let posted = outbound.posted.lock().await;
                if posted.len() >= count {
                    return posted
                        .iter()
                        .map(|(_, body)| serde_json::from_str(body).expect("json body"))
                        .collect();
                }
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn request_without_endpoint_is_a_transport_error() {
        let engine = RpcEngine::new(
            Arc::new(RecordingOutbound::default()),
            TimeoutPolicy::default(),
            None,
        );
        let err = engine
            .send_request("tools/list", None)
            .await
            .expect_err("no endpoint yet");
        assert!(matches!(err, McpError::Transport(_)));
    }

    #[tokio::test]
    async fn concurrent_replies_match_their_own_ids() {
        let outbound = Arc::new(RecordingOutbound::default());
        let engine = engine_with(outbound.clone(), TimeoutPolicy::default()).await;

        let calls: Vec<_> = (0..3)
            .map(|index| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .send_request("tools/call", Some(json!({ "index": index })))
                        .await
                })
            })
            .collect();

        let posts = wait_for_posts(&outbound, 3).await;
        let mut by_id: Vec<(i64, i64)> = posts
            .iter()
            .map(|post| {
                (
                    post["id"].as_i64().expect("id"),
                    post["params"]["index"].as_i64().expect("index"),
                )
            })
            .collect();
        by_id.reverse();

        for (id, index) in &by_id {
            let reply = json!({"jsonrpc": "2.0", "id": id, "result": {"echo": index}});
            engine.dispatch(&reply.to_string()).await.expect("dispatch");
        }

        for (index, call) in calls.into_iter().enumerate() {
            let result = call.await.expect("join").expect("reply");
            assert_eq!(result, json!({"echo": index}));
        }
        assert_eq!(engine.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn notification_has_no_id_and_registers_nothing() {
        let outbound = Arc::new(RecordingOutbound::default());
        let engine = engine_with(outbound.clone(), TimeoutPolicy::default()).await;

        engine
            .send_notification("notifications/initialized", None)
            .await
            .expect("notify");

        let posted = outbound.posted.lock().await;
        assert_eq!(posted[0].0, "http://h/rpc");
        assert_eq!(
            posted[0].1,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#
        );
        drop(posted);
        assert_eq!(engine.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn rejected_post_fails_fast_and_expires_entry() {
        let outbound = Arc::new(RecordingOutbound {
            reject: true,
            ..RecordingOutbound::default()
        });
        let engine = engine_with(outbound, TimeoutPolicy::default()).await;

        let err = engine
            .send_request("tools/list", None)
            .await
            .expect_err("post rejected");
        assert!(matches!(err, McpError::Transport(_)));
        assert_eq!(engine.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expires_and_late_reply_is_ignored() {
        let outbound = Arc::new(RecordingOutbound::default());
        let policy = TimeoutPolicy::default().with_method("slow", Duration::from_secs(2));
        let engine = engine_with(outbound, policy).await;

        let err = engine
            .send_request("slow", None)
            .await
            .expect_err("should time out");
        assert!(matches!(
            err,
            McpError::Timeout { ref method, after } if method == "slow" && after == Duration::from_secs(2)
        ));
        assert_eq!(engine.pending_requests().await, 0);

        engine
            .dispatch(r#"{"jsonrpc":"2.0","id":0,"result":{}}"#)
            .await
            .expect("late reply is a no-op");
    }

    #[tokio::test]
    async fn remote_errors_surface_verbatim() {
        let outbound = Arc::new(RecordingOutbound::default());
        let engine = engine_with(outbound.clone(), TimeoutPolicy::default()).await;

        let call = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.send_request("tools/call", None).await })
        };
        wait_for_posts(&outbound, 1).await;
        engine
            .dispatch(r#"{"jsonrpc":"2.0","id":0,"error":{"code":-32602,"message":"Unknown tool: x"}}"#)
            .await
            .expect("dispatch");

        let error = match call.await.expect("join") {
            Err(McpError::Remote(error)) => error,
            other => panic!("expected remote error, got {other:?}"),
        };
        assert_eq!(error.code, -32602);
        assert_eq!(error.message, "Unknown tool: x");
    }

    #[tokio::test]
    async fn server_request_with_matching_id_does_not_resolve() {
        let outbound = Arc::new(RecordingOutbound::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = Arc::new(RpcEngine::new(
            outbound.clone(),
            TimeoutPolicy::default(),
            Some(tx),
        ));
        engine.set_write_endpoint("http://h/rpc".to_string()).await;

        let call = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.send_request("tools/list", None).await })
        };
        wait_for_posts(&outbound, 1).await;

        engine
            .dispatch(r#"{"jsonrpc":"2.0","id":0,"method":"ping"}"#)
            .await
            .expect("dispatch");
        let observed = rx.recv().await.expect("observed");
        assert_eq!(observed.method, "ping");
        assert_eq!(observed.request_id, Some(json!(0)));
        assert_eq!(engine.pending_requests().await, 1);

        engine
            .dispatch(r#"{"jsonrpc":"2.0","id":0,"result":{"tools":[]}}"#)
            .await
            .expect("dispatch");
        assert_eq!(
            call.await.expect("join").expect("reply"),
            json!({"tools": []})
        );
    }

    #[tokio::test]
    async fn shutdown_fails_inflight_and_later_requests() {
        let outbound = Arc::new(RecordingOutbound::default());
        let engine = engine_with(outbound.clone(), TimeoutPolicy::default()).await;

        let call = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.send_request("tools/call", None).await })
        };
        wait_for_posts(&outbound, 1).await;

        assert_eq!(
            engine
                .shutdown(McpError::ConnectionLost("stream closed".into()))
                .await,
            1
        );
        assert!(matches!(
            call.await.expect("join"),
            Err(McpError::ConnectionLost(_))
        ));
        assert!(matches!(
            engine.send_request("tools/list", None).await,
            Err(McpError::ConnectionLost(_))
        ));
        assert!(engine.is_shut_down().await);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_protocol_error() {
        let engine = engine_with(Arc::new(RecordingOutbound::default()), TimeoutPolicy::default()).await;
        assert!(matches!(
            engine.dispatch("{not json").await,
            Err(McpError::Protocol(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_post_is_bounded_by_the_request_deadline() {
        let policy = TimeoutPolicy::default().with_method("tools/call", Duration::from_secs(2));
        let engine = engine_with(Arc::new(StallingOutbound), policy).await;

        let started = tokio::time::Instant::now();
        let err = engine
            .send_request("tools/call", None)
            .await
            .expect_err("stalled POST should time out");
        assert!(matches!(
            err,
            McpError::Timeout { ref method, after } if method == "tools/call" && after == Duration::from_secs(2)
        ));
        assert!(started.elapsed() < Duration::from_secs(20));
        assert_eq!(engine.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn malformed_reply_fails_its_request_promptly() {
        let outbound = Arc::new(RecordingOutbound::default());
        let engine = engine_with(outbound.clone(), TimeoutPolicy::default()).await;

        let call = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.send_request("tools/call", None).await })
        };
        wait_for_posts(&outbound, 1).await;

        let dispatched = engine
            .dispatch(r#"{"jsonrpc":"2.0","id":0,"error":{"code":"oops","message":1}}"#)
            .await;
        assert!(matches!(dispatched, Err(McpError::Protocol(_))));
        assert!(matches!(
            call.await.expect("join"),
            Err(McpError::Protocol(_))
        ));
        assert_eq!(engine.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn bad_batch_item_does_not_drop_valid_replies() {
        let outbound = Arc::new(RecordingOutbound::default());
        let engine = engine_with(outbound.clone(), TimeoutPolicy::default()).await;

        let calls: Vec<_> = (0..2)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.send_request("tools/call", None).await })
            })
            .collect();
        wait_for_posts(&outbound, 2).await;

        let batch = json!([
            {"jsonrpc": "2.0", "id": 0, "result": {"ok": true}},
            {"jsonrpc": "2.0", "id": 99, "error": {"code": "oops"}},
            {"jsonrpc": "2.0", "id": 1, "result": {"ok": false}}
        ]);
        assert!(matches!(
            engine.dispatch(&batch.to_string()).await,
            Err(McpError::Protocol(_))
        ));

        let mut results = Vec::new();
        for call in calls {
            results.push(call.await.expect("join").expect("reply"));
        }
        results.sort_by_key(|result| result["ok"].as_bool());
        assert_eq!(results, vec![json!({"ok": false}), json!({"ok": true})]);
    }
}
