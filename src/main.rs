use std::path::PathBuf;

use clap::Parser;

use forward_proxy::config::{load_config, validate_config, ConfigError, ProxyConfig};
use forward_proxy::lifecycle::signals::wait_for_shutdown_signal;
use forward_proxy::net::Listener;
use forward_proxy::observability::logging;
use forward_proxy::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "forward-proxy", version)]
#[command(about = "Minimal forward HTTP/HTTPS proxy", long_about = None)]
struct Cli {
    /// Port to listen on; overrides the port of the configured bind address
    /// (0.0.0.0:8080 when no config file is given)
    #[arg(short, long)]
    port: Option<u16>,

    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(port) = cli.port {
        config = config.with_port(port);
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init(&config.observability.log_level);

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        "Starting proxy server"
    );

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config);
    let server_shutdown = shutdown.subscribe();
    let server_task = tokio::spawn(async move { server.run(listener, server_shutdown).await });

    wait_for_shutdown_signal().await;
    shutdown.trigger();
    server_task.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}
