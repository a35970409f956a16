//! Council MCP Server - model brainstorms and a sandboxed runner over stdio.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use embeddenator_council_mcp::server::server_error;
use embeddenator_council_mcp::transport::write_frame;
use embeddenator_council_mcp::{AgentMcpServer, Error, HttpGateway, Settings};

/// Council MCP Server - multi-model brainstorms and a sandboxed runner.
#[derive(Parser, Debug)]
#[command(name = "council-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON.
    #[arg(long, default_value = "false")]
    json_logs: bool,

    #[command(flatten)]
    settings: Settings,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging - output to stderr to avoid interfering with MCP protocol
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match serve(args.settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server stopped: {:#}", e);
            report_fatal(&e);
            ExitCode::FAILURE
        }
    }
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let config = settings.into_config(&cwd)?;

    info!(
        surface = ?config.surface,
        roots = ?config.bridge.allowed_roots.roots(),
        runner = %config.bridge.command,
        "Council MCP server starting"
    );

    let gateway = Arc::new(HttpGateway::new()?);
    let mut server = AgentMcpServer::from_config(config, gateway);
    server.run_stdio().await?;

    Ok(())
}

/// Best effort: tell the host why we are exiting with a null-id error frame.
fn report_fatal(err: &anyhow::Error) {
    let response = server_error(None, &Error::Internal(format!("{:#}", err)));
    if let Ok(body) = serde_json::to_vec(&response) {
        let _ = write_frame(&mut std::io::stdout(), &body);
    }
}
