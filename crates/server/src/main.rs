mod cli;

use anyhow::Context;
use clap::Parser;
use hostgate_core::Config;
use hostgate_mcp::{McpServer, StdioTransport};
use hostgate_server::{build_router, AppState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn load_config() -> anyhow::Result<Config> {
    hostgate_core::config::load_dotenv();
    Config::from_env().context("loading configuration")
}

/// `RUST_LOG` overrides, default `info`. In stdio mode stdout carries
/// JSON-RPC, so logs go to stderr.
fn init_tracing(to_stderr: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);
    if to_stderr {
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
}

async fn serve(mut config: Config, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.log_summary();

    let state = AppState::from_config(&config)?;
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Server listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server exited cleanly");
    Ok(())
}

async fn stdio(config: Config) -> anyhow::Result<()> {
    let state = AppState::from_config(&config)?;
    let mut server = McpServer::new(state.dispatcher.clone(), state.auth.clone());
    let mut transport = StdioTransport::stdio();
    server.run(&mut transport).await?;
    Ok(())
}

fn print_tools(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let tools: Vec<_> = state
        .dispatcher
        .definitions()
        .into_iter()
        .map(hostgate_mcp::ToolInfo::from)
        .collect();
    println!("{}", serde_json::to_string_pretty(&tools)?);
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;

    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command();
    init_tracing(command == Command::Stdio);

    let config = load_config()?;
    match command {
        Command::Serve { host, port } => serve(config, host, port).await,
        Command::Stdio => stdio(config).await,
        Command::Tools => print_tools(&config),
    }
}
