//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod tool_call;
pub mod tool_list;

use std::error::Error;

use clap::{Parser, Subcommand};

use crate::cli::tool_call::call_tool;
use crate::cli::tool_list::list_tools;
use crate::core::config::Config;
use crate::logging::init_tracing;
use crate::mcp::McpClient;

#[derive(Parser)]
#[command(name = "toolwire")]
#[command(about = "Discover and invoke tools on an MCP server over SSE")]
#[command(
    long_about = "Toolwire connects to a Model Context Protocol server that speaks the SSE \
transport: it listens on the server's event stream and posts JSON-RPC requests to the \
endpoint the stream announces.\n\n\
Configuration:\n\
  Use 'toolwire set-server <url>' to remember a default server address.\n\
  Timeouts can be tuned in the config file (see 'toolwire config').\n\n\
Environment Variables:\n\
  RUST_LOG          Log filter (defaults to toolwire=info)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Event stream address of the MCP server (overrides the configured default)
    #[arg(short = 'u', long, global = true, value_name = "URL")]
    pub url: Option<String>,

    /// Write logs to the specified file instead of stderr
    #[arg(short = 'l', long, global = true)]
    pub log: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the tools the server offers
    Tools,
    /// Invoke a tool and print its result
    Call {
        /// Tool name as listed by `toolwire tools`
        name: String,
        /// Arguments as a JSON object
        #[arg(short = 'a', long, value_name = "JSON", default_value = "{}")]
        args: String,
    },
    /// Remember a server address as the default
    SetServer {
        /// Event stream address, e.g. http://localhost:8080/sse
        url: String,
    },
    /// Show the current configuration
    Config,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.log.as_deref())?;

    let config_path = Config::get_config_path()?;
    let mut config = Config::load_from_path(&config_path)?;

    match args.command {
        Commands::Tools => {
            let address = resolve_server(&config, args.url.as_deref())?;
            let client = McpClient::from_config(&config)?;
            list_tools(&client, &address).await
        }
        Commands::Call { name, args: raw } => {
            let address = resolve_server(&config, args.url.as_deref())?;
            let client = McpClient::from_config(&config)?;
            call_tool(&client, &address, &name, &raw).await
        }
        Commands::SetServer { url } => {
            let url = validate_server_url(&url)?;
            config.default_server = Some(url.clone());
            config.save_to_path(&config_path)?;
            println!("✅ Set default-server to: {url}");
            Ok(())
        }
        Commands::Config => {
            config.print_all();
            Ok(())
        }
    }
}

pub(crate) fn resolve_server(config: &Config, explicit: Option<&str>) -> Result<String, String> {
    let address = config.server_address(explicit).ok_or_else(|| {
        "No MCP server configured. Pass --url or run 'toolwire set-server <url>'.".to_string()
    })?;
    validate_server_url(address)
}

/// Accepts absolute http(s) addresses only.
pub(crate) fn validate_server_url(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    let url = reqwest::Url::parse(trimmed)
        .map_err(|err| format!("Invalid server URL '{trimmed}': {err}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        other => Err(format!(
            "Unsupported scheme '{other}' in '{trimmed}'; expected http or https"
        )),
    }
}
