use std::error::Error;

use crate::mcp::{McpClient, ToolCatalog};
use rust_mcp_schema::mcp_2024_11_05::InitializeResult;

pub async fn list_tools(client: &McpClient, address: &str) -> Result<(), Box<dyn Error>> {
    client.connect(address).await?;
    let catalog = client.tools();
    let server = client.server_info().await;
    client.disconnect().await;

    if let Some(server) = &server {
        println!("{}\n", format_server_line(server));
    }
    print!("{}", format_tool_list(&catalog));
    Ok(())
}

pub(crate) fn format_server_line(server: &InitializeResult) -> String {
    format!(
        "Server: {} {} (protocol {})",
        server.server_info.name, server.server_info.version, server.protocol_version
    )
}

pub(crate) fn format_tool_list(catalog: &ToolCatalog) -> String {
    if catalog.is_empty() {
        return "No tools offered.\n".to_string();
    }

    let width = catalog.names().map(str::len).max().unwrap_or(0);
    let mut out = format!("Available Tools ({}):\n\n", catalog.len());
    for tool in catalog.tools() {
        let description = tool
            .description
            .as_deref()
            .and_then(|text| text.lines().next())
            .unwrap_or("");
        out.push_str(&format!("  {:<width$}  {}\n", tool.name, description));

        let required = tool.required_parameters();
        let params: Vec<String> = tool
            .parameter_names()
            .into_iter()
            .map(|name| {
                if required.contains(&name) {
                    format!("{name}*")
                } else {
                    name.to_string()
                }
            })
            .collect();
        if !params.is_empty() {
            out.push_str(&format!("  {:<width$}  args: {}\n", "", params.join(", ")));
        }
    }
    out.push_str("\n* = required argument\n");
    out
}
