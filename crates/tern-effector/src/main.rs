//! Tern effector daemon.
//!
//! Consumes rules-engine verdicts and applies each effect through the
//! moderation console, logging effects to the configured analytics sinks.
//! Only the `production` environment issues mutating calls; every other
//! environment counts effects without applying them.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tern_core::metrics::{init_metrics, start_metrics_server};
use tern_effector::logmgr::{ChatLogger, TracingLogger};
use tern_effector::memo::DEFAULT_MEMO_TTL;
use tern_effector::{
    ActionMemo, Effector, EffectorArgs, FlagClient, LogManager, MemcachedStore, OzoneClient,
    OzoneClientArgs, WarehouseLogger,
};

/// Tern effector daemon.
#[derive(Parser, Debug)]
#[command(name = "tern-effector")]
#[command(about = "Applies rules-engine verdicts as moderation actions")]
#[command(version)]
struct Args {
    /// Kafka bootstrap servers (comma-separated)
    #[arg(long, env = "KAFKA_BOOTSTRAP_SERVERS", value_delimiter = ',', required = true)]
    bootstrap_servers: Vec<String>,

    /// Topic to consume verdicts from
    #[arg(long, env = "TERN_EFFECTOR_INPUT_TOPIC", required = true)]
    input_topic: String,

    /// Consumer group
    #[arg(long, env = "TERN_EFFECTOR_CONSUMER_GROUP", default_value = "effector-consumers")]
    consumer_group: String,

    /// Moderation console PDS host
    #[arg(long, env = "TERN_OZONE_PDS_HOST", required = true)]
    ozone_pds_host: String,

    /// Moderation account identifier
    #[arg(long, env = "TERN_OZONE_IDENTIFIER", required = true)]
    ozone_identifier: String,

    /// Moderation account password
    #[arg(long, env = "TERN_OZONE_PASSWORD", required = true)]
    ozone_password: String,

    /// DID of the labeler service to proxy moderation calls to
    #[arg(long, env = "TERN_OZONE_PROXY_DID", required = true)]
    ozone_proxy_did: String,

    /// Values other than `production` do not take actions in the console
    #[arg(long, env = "TERN_ENVIRONMENT", default_value = "staging")]
    environment: String,

    /// Analytics warehouse URL (enables warehouse logging in production)
    #[arg(long, env = "TERN_CLICKHOUSE_URL")]
    clickhouse_url: Option<String>,

    /// Analytics warehouse database
    #[arg(long, env = "TERN_CLICKHOUSE_DATABASE", default_value = "tern")]
    clickhouse_database: String,

    /// Analytics warehouse user
    #[arg(long, env = "TERN_CLICKHOUSE_USER", default_value = "default")]
    clickhouse_user: String,

    /// Analytics warehouse password
    #[arg(long, env = "TERN_CLICKHOUSE_PASSWORD", default_value = "")]
    clickhouse_password: String,

    /// Chat webhook URL for per-effect notifications
    #[arg(long, env = "TERN_CHAT_WEBHOOK_URL")]
    chat_webhook_url: Option<String>,

    /// Base URL of the moderation console UI, used in chat links
    #[arg(long, env = "TERN_CONSOLE_URL", default_value = "https://ozone.example.com")]
    console_url: String,

    /// Memcached servers backing the action-memo cache (comma-separated)
    #[arg(long, env = "TERN_MEMCACHED_SERVERS", value_delimiter = ',', required = true)]
    memcached_servers: Vec<String>,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9092")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("tern_effector=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let is_production = args.environment == "production";

    if args.metrics_port > 0 {
        let handle = init_metrics();
        start_metrics_server(args.metrics_port, handle).await?;
    }

    let moderation = OzoneClient::login(OzoneClientArgs {
        pds_host: args.ozone_pds_host.clone(),
        identifier: args.ozone_identifier.clone(),
        password: args.ozone_password.clone(),
        proxy_did: args.ozone_proxy_did.clone(),
        is_production,
    })
    .await
    .context("could not create moderation client")?;

    let memo_store =
        MemcachedStore::connect(&args.memcached_servers).context("failed to connect to memcached")?;
    let memo = ActionMemo::new(Arc::new(memo_store), DEFAULT_MEMO_TTL);

    let mut log_manager = LogManager::new();
    let mut warehouse_logger = None;
    let mut flags = None;

    if is_production {
        if let Some(url) = &args.clickhouse_url {
            let client = clickhouse::Client::default()
                .with_url(url)
                .with_database(&args.clickhouse_database)
                .with_user(&args.clickhouse_user)
                .with_password(&args.clickhouse_password);

            let logger = Arc::new(WarehouseLogger::new(client.clone()));
            log_manager
                .add_logger(logger.clone())
                .context("failed to register warehouse logger")?;
            warehouse_logger = Some(logger);
            flags = Some(Arc::new(FlagClient::new(client)));
            tracing::info!(url = %url, "initialized warehouse logger");
        }
    }

    if let Some(webhook) = &args.chat_webhook_url {
        log_manager
            .add_logger(Arc::new(ChatLogger::new(webhook.clone(), args.console_url.clone())))
            .context("failed to register chat logger")?;
        tracing::info!("initialized chat logger");
    }

    log_manager
        .add_logger(Arc::new(TracingLogger))
        .context("failed to register tracing logger")?;

    let effector = Effector::new(
        Arc::new(moderation),
        memo,
        Arc::new(log_manager),
        flags.clone(),
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_exit_signal().await;
        tracing::info!("received OS exit signal");
        signal_token.cancel();
    });

    let effector_args = EffectorArgs {
        bootstrap_servers: args.bootstrap_servers.clone(),
        input_topic: args.input_topic.clone(),
        consumer_group: args.consumer_group.clone(),
    };

    effector
        .run(&effector_args, &shutdown)
        .await
        .context("error running effector")?;

    // Flush partial warehouse batches before exit.
    if let Some(logger) = warehouse_logger {
        logger.close().await;
    }
    if let Some(flags) = flags {
        flags.close().await;
    }

    tracing::info!("graceful shutdown complete");
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
