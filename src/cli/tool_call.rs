use std::error::Error;

use serde_json::Value;

use crate::mcp::McpClient;

pub async fn call_tool(
    client: &McpClient,
    address: &str,
    name: &str,
    raw_arguments: &str,
) -> Result<(), Box<dyn Error>> {
    let arguments = parse_arguments(raw_arguments)?;

    client.connect(address).await?;
    let result = client.invoke(name, arguments).await;
    client.disconnect().await;

    println!("{}", render_result(&result?));
    Ok(())
}

pub(crate) fn parse_arguments(raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value =
        serde_json::from_str(trimmed).map_err(|err| format!("Invalid --args JSON: {err}"))?;
    if !value.is_object() {
        return Err("--args must be a JSON object".to_string());
    }
    Ok(value)
}

/// Text content blocks are printed as-is; anything else falls back to JSON.
pub(crate) fn render_result(result: &Value) -> String {
    let texts: Option<Vec<&str>> = result
        .get("content")
        .and_then(Value::as_array)
        .filter(|blocks| !blocks.is_empty())
        .map(|blocks| {
            blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect()
        });

    match texts {
        Some(texts) if !texts.is_empty() => {
            let body = texts.join("\n");
            if result.get("isError").and_then(Value::as_bool) == Some(true) {
                format!("Tool reported an error:\n{body}")
            } else {
                body
            }
        }
        _ => serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string()),
    }
}
