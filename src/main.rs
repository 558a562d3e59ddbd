// ABOUTME: Entry point for the husk relay
// ABOUTME: Initializes logging, config, and metrics, then runs the HTTP server and console connector

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use husk::{
    config::Config,
    connector::{ConnectorRegistry, ConsoleConnector},
    server::{self, AppState},
    traits::Connector,
    Relay,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server and the console connector (default)
    Serve {
        /// Channel ID given to console messages
        #[arg(long, default_value = husk::connector::console::DEFAULT_CHANNEL)]
        channel: String,
    },
    /// Load and validate the configuration, then print a summary
    CheckConfig,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    // Logs go to stderr so console replies on stdout stay readable.
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json);

    dotenvy::dotenv().ok();
    let config = Config::load()?;

    match cli.command {
        Some(Command::CheckConfig) => check_config(&config),
        Some(Command::Serve { channel }) => serve(config, channel).await,
        None => serve(config, husk::connector::console::DEFAULT_CHANNEL.to_string()).await,
    }
}

fn check_config(config: &Config) -> Result<()> {
    println!("Configuration OK");
    println!("  server:          {}:{}", config.server.host, config.server.port);
    println!(
        "  rate limit:      {} per {} ms",
        config.rate_limit.max_requests, config.rate_limit.window_ms
    );
    println!(
        "  circuit breaker: {} failures, {} ms reset",
        config.circuit_breaker.threshold, config.circuit_breaker.reset_timeout_ms
    );
    println!(
        "  retry:           {} attempts, {} ms x{}",
        config.retry.max_attempts, config.retry.delay_ms, config.retry.backoff_multiplier
    );
    println!("  audit capacity:  {}", config.audit.capacity);
    // Owner IDs are not printed.
    println!("  owners:          {}", config.security.owners.len());
    println!("  bot name:        {}", config.bot.name);
    Ok(())
}

async fn serve(config: Config, channel: String) -> Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        bot = %config.bot.name,
        "Starting husk"
    );

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let console = Arc::new(ConsoleConnector::new(&config.bot.name).channel(channel));
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let relay = Arc::new(Relay::builder(config, console.sender()).build()?);
    relay.start_maintenance();

    let state = AppState::from_relay(&relay, Some(metrics_handle));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        server::serve(&addr, state, async {
            let _ = shutdown_rx.await;
        })
        .await
    });

    let mut connectors = ConnectorRegistry::new();
    connectors.register(console);
    connectors.start_all(relay.clone()).await?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
        }
        // The server only stops on its own if it failed.
        result = &mut server => {
            connectors.shutdown_all().await;
            relay.shutdown();
            return result.context("HTTP server task panicked")?;
        }
    }
    tracing::info!("Shutting down");

    connectors.shutdown_all().await;
    relay.shutdown();
    let _ = shutdown_tx.send(());
    server.await.context("HTTP server task panicked")??;
    Ok(())
}
