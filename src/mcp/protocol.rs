//! JSON-RPC envelopes exchanged with an MCP server.
//!
//! Outbound messages are serialized with the exact field layout servers expect:
//! `{"jsonrpc":"2.0","id":<int>,"method":<string>,"params":<object>}`, where
//! notifications drop `id` and both drop `params` when there are none. Inbound
//! payloads are classified before dispatch so that a server-initiated request
//! carrying an id is never confused with a reply.

use crate::mcp::error::McpError;
use rust_mcp_schema::mcp_2024_11_05::schema_utils::ServerMessage;
use rust_mcp_schema::mcp_2024_11_05::{CallToolResult, InitializeResult, ListToolsResult, LATEST_PROTOCOL_VERSION};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = LATEST_PROTOCOL_VERSION;
pub const CLIENT_NAME: &str = "toolwire";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_LIST_TOOLS: &str = "tools/list";
pub const METHOD_CALL_TOOL: &str = "tools/call";

#[derive(Debug, Serialize)]
pub struct RequestEnvelope<'a> {
    jsonrpc: &'static str,
    id: i64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

impl<'a> RequestEnvelope<'a> {
    pub fn new(id: i64, method: &'a str, params: Option<&'a Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NotificationEnvelope<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

impl<'a> NotificationEnvelope<'a> {
    pub fn new(method: &'a str, params: Option<&'a Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// One item of a push-channel payload.
#[derive(Debug)]
pub enum Inbound {
    /// A message that matched the server schema. `reply_id` is the integer id
    /// of a response or error reply.
    Message {
        reply_id: Option<i64>,
        message: ServerMessage,
        raw: Value,
    },
    /// An item that did not match. `reply_id` is still set when the item looks
    /// like a reply to one of our integer ids, so its caller can be failed.
    Malformed {
        reply_id: Option<i64>,
        error: McpError,
    },
}

/// Parses one push-channel payload. Batch items are classified one at a time,
/// so a bad item never hides the valid ones next to it.
pub fn parse_inbound(payload: &str) -> Result<Vec<Inbound>, McpError> {
    let value = serde_json::from_str::<Value>(payload)
        .map_err(|err| McpError::Protocol(format!("Unparsable message: {err}")))?;
    Ok(match value {
        Value::Array(items) => items.into_iter().map(classify).collect(),
        other => vec![classify(other)],
    })
}

fn classify(item: Value) -> Inbound {
    let reply_id = reply_id(&item);
    let malformed = |error: String| Inbound::Malformed {
        reply_id,
        error: McpError::Protocol(error),
    };

    let Some(object) = item.as_object() else {
        return malformed("Message is not a JSON object.".to_string());
    };
    match object.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(other) => return malformed(format!("Unsupported jsonrpc version: {other}")),
        None => return malformed("Missing jsonrpc version.".to_string()),
    }

    match serde_json::from_value::<ServerMessage>(item.clone()) {
        Ok(message) => Inbound::Message {
            reply_id,
            message,
            raw: item,
        },
        Err(err) => malformed(format!("Malformed message: {err}")),
    }
}

/// Integer id of an item without a `method`, i.e. a reply.
fn reply_id(item: &Value) -> Option<i64> {
    let object = item.as_object()?;
    if object.contains_key("method") {
        return None;
    }
    object.get("id").and_then(Value::as_i64)
}

/// Parameters sent once with `initialize`.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "roots": { "listChanged": true },
            "sampling": {}
        },
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": CLIENT_VERSION
        }
    })
}

fn parse_result<T: DeserializeOwned>(result: Value, what: &str) -> Result<T, McpError> {
    serde_json::from_value(result)
        .map_err(|err| McpError::Protocol(format!("Unexpected {what} response: {err}")))
}

pub fn parse_initialize_result(result: Value) -> Result<InitializeResult, McpError> {
    parse_result(result, METHOD_INITIALIZE)
}

pub fn parse_list_tools_result(result: Value) -> Result<ListToolsResult, McpError> {
    let mut page: ListToolsResult = parse_result(result, METHOD_LIST_TOOLS)?;
    if page.next_cursor.as_deref().is_some_and(str::is_empty) {
        page.next_cursor = None;
    }
    Ok(page)
}

/// Checks a `tools/call` result against the schema. The caller keeps the
/// original JSON.
pub fn parse_call_tool_result(result: &Value) -> Result<CallToolResult, McpError> {
    parse_result(result.clone(), METHOD_CALL_TOOL)
}

pub fn list_tools_params(cursor: Option<&str>) -> Option<Value> {
    cursor.map(|cursor| json!({ "cursor": cursor }))
}

pub fn call_tool_params(name: &str, arguments: Value) -> Value {
    json!({ "name": name, "arguments": arguments })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_layout_is_exact() {
        let params = json!({"a": 1});
        let text = serde_json::to_string(&RequestEnvelope::new(7, "tools/list", Some(&params)))
            .expect("serialize");
        assert_eq!(
            text,
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/list","params":{"a":1}}"#
        );
    }

    #[test]
    fn notification_omits_id_and_absent_params() {
        let text = serde_json::to_string(&NotificationEnvelope::new(METHOD_INITIALIZED, None))
            .expect("serialize");
        assert_eq!(
            text,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#
        );
    }

    fn single(payload: &str) -> Inbound {
        let mut items = parse_inbound(payload).expect("parse");
        assert_eq!(items.len(), 1);
        items.remove(0)
    }

    #[test]
    fn protocol_version_is_pinned() {
        assert_eq!(PROTOCOL_VERSION, "2024-11-05");
    }

    #[test]
    fn server_request_with_id_is_not_a_response() {
        let Inbound::Message {
            reply_id, message, ..
        } = single(r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#)
        else {
            panic!("expected a message");
        };
        assert_eq!(reply_id, None);
        assert!(matches!(message, ServerMessage::Request(_)));
    }

    #[test]
    fn error_response_keeps_code_message_and_data() {
        let Inbound::Message {
            reply_id, message, ..
        } = single(r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"nope","data":[1]}}"#)
        else {
            panic!("expected a message");
        };
        assert_eq!(reply_id, Some(4));
        let ServerMessage::Error(error) = message else {
            panic!("expected an error reply");
        };
        assert_eq!(error.error.code, -32601);
        assert_eq!(error.error.message, "nope");
        assert_eq!(error.error.data, Some(json!([1])));
    }

    #[test]
    fn malformed_reply_still_names_its_request() {
        let Inbound::Malformed { reply_id, error } =
            single(r#"{"jsonrpc":"2.0","id":0,"error":{"code":"oops","message":1}}"#)
        else {
            panic!("expected a malformed item");
        };
        assert_eq!(reply_id, Some(0));
        assert!(matches!(error, McpError::Protocol(_)));
    }

    #[test]
    fn batch_items_are_classified_independently() {
        let items = parse_inbound(
            r#"[{"jsonrpc":"2.0","method":"notifications/message"},{"jsonrpc":"2.0","id":2,"error":{"code":"x"}},{"jsonrpc":"2.0","id":3,"result":{}}]"#,
        )
        .expect("parse");
        assert_eq!(items.len(), 3);
        assert!(matches!(
            &items[0],
            Inbound::Message { message: ServerMessage::Notification(_), .. }
        ));
        assert!(matches!(
            &items[1],
            Inbound::Malformed { reply_id: Some(2), .. }
        ));
        assert!(matches!(
            &items[2],
            Inbound::Message { reply_id: Some(3), message: ServerMessage::Response(_), .. }
        ));
    }

    #[test]
    fn malformed_payloads_are_protocol_errors() {
        assert!(matches!(parse_inbound("not json"), Err(McpError::Protocol(_))));
        assert!(matches!(
            single("42"),
            Inbound::Malformed { reply_id: None, .. }
        ));
        assert!(matches!(
            single(r#"{"jsonrpc":"1.0","id":1,"result":{}}"#),
            Inbound::Malformed { reply_id: Some(1), .. }
        ));
    }

    #[test]
    fn initialize_result_uses_schema_shape() {
        assert!(parse_initialize_result(json!("ok")).is_err());
        let result = parse_initialize_result(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "serverInfo": {"name": "mock", "version": "0.1.0"}
        }))
        .expect("initialize result");
        assert_eq!(result.server_info.name, "mock");
        assert_eq!(result.protocol_version, "2024-11-05");
    }

    #[test]
    fn call_result_needs_content() {
        let result = parse_call_tool_result(&json!({
            "content": [{"type": "text", "text": "graded 7"}],
            "isError": false
        }))
        .expect("call result");
        assert_eq!(result.content.len(), 1);
        assert!(parse_call_tool_result(&json!({"value": 7})).is_err());
    }

    #[test]
    fn tool_list_reads_cursor() {
        let page = parse_list_tools_result(json!({
            "tools": [{"name": "grade", "inputSchema": {"type": "object"}}],
            "nextCursor": "c1"
        }))
        .expect("page");
        assert_eq!(page.next_cursor.as_deref(), Some("c1"));
        assert_eq!(page.tools[0].name, "grade");
        let last = parse_list_tools_result(json!({"tools": [], "nextCursor": ""})).expect("page");
        assert_eq!(last.next_cursor, None);
        assert!(parse_list_tools_result(json!({"items": []})).is_err());
    }
}
