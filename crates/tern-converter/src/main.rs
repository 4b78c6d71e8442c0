//! Tern firehose converter daemon.
//!
//! Subscribes to a relay's repo-commit firehose and republishes decoded,
//! validated events on the bus, keyed by subject DID, with a persistent
//! resume cursor.
//!
//! # Usage
//!
//! ```bash
//! tern-converter \
//!     --bootstrap-servers kafka-1:9092,kafka-2:9092 \
//!     --output-topic firehose_events
//!
//! # Resume from an explicit sequence
//! tern-converter --bootstrap-servers kafka-1:9092 --cursor-override 123456
//! ```
//!
//! # Graceful Shutdown
//!
//! SIGINT/SIGTERM stop the subscriber, drain in-flight workers, flush the
//! producer, and checkpoint the cursor with `savedOnExit` before exiting.

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tern_converter::{Converter, ConverterArgs};
use tern_core::metrics::{init_metrics, start_metrics_server};

/// Tern firehose converter daemon.
#[derive(Parser, Debug)]
#[command(name = "tern-converter")]
#[command(about = "Converts the firehose into bus events")]
#[command(version)]
struct Args {
    /// Full WebSocket URL of the relay subscription endpoint
    #[arg(
        long,
        env = "TERN_CONVERTER_RELAY_HOST",
        default_value = "wss://bsky.network/xrpc/com.atproto.sync.subscribeRepos"
    )]
    relay_host: String,

    /// Kafka bootstrap servers (comma-separated)
    #[arg(long, env = "KAFKA_BOOTSTRAP_SERVERS", value_delimiter = ',', required = true)]
    bootstrap_servers: Vec<String>,

    /// Topic to produce firehose events to
    #[arg(long, env = "TERN_CONVERTER_OUTPUT_TOPIC", default_value = "firehose_events")]
    output_topic: String,

    /// Override the resume cursor; negative means "use the persisted cursor"
    #[arg(long, env = "TERN_CONVERTER_CURSOR_OVERRIDE", default_value = "-1", allow_hyphen_values = true)]
    cursor_override: i64,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("tern_converter=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    if args.metrics_port > 0 {
        let handle = init_metrics();
        start_metrics_server(args.metrics_port, handle).await?;
    }

    let converter = Converter::new(ConverterArgs {
        relay_host: args.relay_host,
        bootstrap_servers: args.bootstrap_servers,
        output_topic: args.output_topic,
        cursor_override: args.cursor_override,
    })
    .context("failed to create converter")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_exit_signal().await;
        tracing::info!("received OS exit signal");
        signal_token.cancel();
    });

    converter
        .run(shutdown)
        .await
        .context("error running converter")?;

    Ok(())
}

async fn wait_for_exit_signal() {
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("sigterm handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
