use super::engine::RpcEngine;
use crate::mcp::error::McpError;
use crate::mcp::protocol::{
    call_tool_params, initialize_params, list_tools_params, parse_call_tool_result,
    parse_initialize_result, parse_list_tools_result, METHOD_CALL_TOOL, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_LIST_TOOLS,
};
use crate::mcp::registry::{ToolCatalog, ToolDescriptor};
use rust_mcp_schema::mcp_2024_11_05::InitializeResult;
use serde_json::Value;
use tracing::{debug, info, warn};

pub const MCP_MAX_TOOL_LIST: usize = 100;

/// `initialize`, then `notifications/initialized`, then a full tool listing.
pub(crate) async fn run_handshake(
    engine: &RpcEngine,
) -> Result<(InitializeResult, ToolCatalog), McpError> {
    debug!("Initializing MCP session");
    let result = engine
        .send_request(METHOD_INITIALIZE, Some(initialize_params()))
        .await?;
    let server_info = parse_initialize_result(result)?;
    info!(
        server = %server_info.server_info.name,
        protocol_version = %server_info.protocol_version,
        "MCP server initialized"
    );

    engine.send_notification(METHOD_INITIALIZED, None).await?;

    let catalog = list_tools(engine).await?;
    Ok((server_info, catalog))
}

/// Fetches every page of `tools/list`, capped at [`MCP_MAX_TOOL_LIST`].
pub(crate) async fn list_tools(engine: &RpcEngine) -> Result<ToolCatalog, McpError> {
    let mut tools: Vec<ToolDescriptor> = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let result = engine
            .send_request(METHOD_LIST_TOOLS, list_tools_params(cursor.as_deref()))
            .await?;
        let page = parse_list_tools_result(result)?;
        tools.extend(page.tools.into_iter().map(ToolDescriptor::from));

        if tools.len() >= MCP_MAX_TOOL_LIST {
            if tools.len() > MCP_MAX_TOOL_LIST || page.next_cursor.is_some() {
                warn!(limit = MCP_MAX_TOOL_LIST, "Truncating MCP tool list");
            }
            tools.truncate(MCP_MAX_TOOL_LIST);
            break;
        }

        match page.next_cursor {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            Some(next) => {
                warn!(cursor = %next, "MCP server repeated a tools/list cursor");
                break;
            }
            None => break,
        }
    }

    debug!(count = tools.len(), "Discovered MCP tools");
    Ok(ToolCatalog::new(tools))
}

pub(crate) async fn call_tool(
    engine: &RpcEngine,
    name: &str,
    arguments: Value,
) -> Result<Value, McpError> {
    debug!(tool = %name, "Calling MCP tool");
    let result = engine
        .send_request(METHOD_CALL_TOOL, Some(call_tool_params(name, arguments)))
        .await?;
    parse_call_tool_result(&result)?;
    Ok(result)
}
