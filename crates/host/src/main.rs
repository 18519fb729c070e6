use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use wsgate_host::config::Config;
use wsgate_host::ws::{EventReceiver, Gateway};

/// WebSocket gateway that waits for an external accept/reject decision
///
/// Connect requests and inbound frames are written to stdout as JSON
/// lines; decisions and outbound commands are read from stdin.
#[derive(Debug, Parser)]
#[command(name = "wsgate", version, about)]
struct Cli {
    /// Config file (default: ~/.config/wsgate/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind, overriding the config file
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on, overriding the config file
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the event stream
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // === LOAD CONFIGURATION ===
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let (gateway, events) = Gateway::bind(&config.server)
        .await
        .context("Failed to start upgrade listener")?;

    let writer = tokio::spawn(write_events(events));

    tokio::select! {
        result = read_commands(gateway.clone()) => {
            match result {
                Ok(()) => tracing::info!("Consumer closed stdin"),
                Err(e) => tracing::error!(error = %e, "Reading commands failed"),
            }
        }
        () = shutdown_signal() => {}
    }

    tracing::info!(sessions = gateway.registry().len(), "Graceful shutdown initiated");
    gateway.shutdown().await;
    writer.abort();

    Ok(())
}

/// Write each consumer event as one JSON line on stdout
async fn write_events(mut events: EventReceiver) {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        let mut line = match serde_json::to_vec(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode event");
                continue;
            }
        };
        line.push(b'\n');
        if stdout.write_all(&line).await.is_err() || stdout.flush().await.is_err() {
            tracing::warn!("Stdout closed, no longer forwarding events");
            break;
        }
    }
}

/// Apply decisions and outbound commands read from stdin until EOF
async fn read_commands(gateway: Gateway) -> anyhow::Result<()> {
    gateway
        .serve_commands(BufReader::new(tokio::io::stdin()))
        .await
        .context("Failed to read stdin")
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
