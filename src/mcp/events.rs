use serde_json::Value;

/// A server-initiated message observed on the push channel.
///
/// `request_id` is set when the server sent a request rather than a plain
/// notification; this client never answers those.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerNotification {
    pub method: String,
    pub params: Option<Value>,
    pub request_id: Option<Value>,
}

impl ServerNotification {
    /// Lifts the members of a classified request or notification object.
    pub fn from_raw(mut raw: Value) -> Self {
        let method = raw
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let request_id = raw.get_mut("id").map(Value::take).filter(|id| !id.is_null());
        let params = raw.get_mut("params").map(Value::take);
        Self {
            method,
            params,
            request_id,
        }
    }
}
