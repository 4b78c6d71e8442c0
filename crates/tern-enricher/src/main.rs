//! Tern enricher daemon.
//!
//! Consumes firehose events from the bus, fans each commit out to the
//! configured enrichment services, and produces rules-engine input events.
//! Service clients are constructed only when their flags are set; an
//! unconfigured service simply contributes no sub-result.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tern_core::metrics::{init_metrics, start_metrics_server};
use tern_enricher::clients::{
    AbuseClient, CdnClient, ClassifierClient, DidClient, ModRepoClient, OcrClient, PhashClient,
    PrescreenClient, ProfileClient,
};
use tern_enricher::{Clients, Enricher, EnricherArgs};

/// Tern enricher daemon.
#[derive(Parser, Debug)]
#[command(name = "tern-enricher")]
#[command(about = "Enriches firehose events with moderation signals")]
#[command(version)]
struct Args {
    /// Kafka bootstrap servers (comma-separated)
    #[arg(long, env = "KAFKA_BOOTSTRAP_SERVERS", value_delimiter = ',', required = true)]
    bootstrap_servers: Vec<String>,

    /// Topic to consume firehose events from
    #[arg(long, env = "TERN_ENRICHER_INPUT_TOPIC", default_value = "firehose_events")]
    input_topic: String,

    /// Topic to produce enriched events to
    #[arg(long, env = "TERN_ENRICHER_OUTPUT_TOPIC", default_value = "enriched_records")]
    output_topic: String,

    /// Consumer group
    #[arg(long, env = "TERN_ENRICHER_CONSUMER_GROUP", default_value = "enricher-consumers")]
    consumer_group: String,

    /// Appview host (enables profile views)
    #[arg(long, env = "TERN_APPVIEW_HOST")]
    appview_host: Option<String>,

    /// Appview rate-limit bypass token
    #[arg(long, env = "TERN_APPVIEW_RATELIMIT_BYPASS")]
    appview_ratelimit_bypass: Option<String>,

    /// Moderation console host (enables repo views)
    #[arg(long, env = "TERN_OZONE_HOST")]
    ozone_host: Option<String>,

    /// Moderation console admin token
    #[arg(long, env = "TERN_OZONE_ADMIN_TOKEN")]
    ozone_admin_token: Option<String>,

    /// PLC directory host (enables DID resolution + audit logs)
    #[arg(long, env = "TERN_PLC_HOST")]
    plc_host: Option<String>,

    /// Image CDN host (enables image enrichment)
    #[arg(long, env = "TERN_CDN_HOST")]
    cdn_host: Option<String>,

    /// Prescreen classifier host
    #[arg(long, env = "TERN_PRESCREEN_HOST")]
    prescreen_host: Option<String>,

    /// Heavy classifier endpoint URL
    #[arg(long, env = "TERN_CLASSIFIER_URL")]
    classifier_url: Option<String>,

    /// Heavy classifier API token
    #[arg(long, env = "TERN_CLASSIFIER_TOKEN")]
    classifier_token: Option<String>,

    /// OCR service URL
    #[arg(long, env = "TERN_OCR_URL")]
    ocr_url: Option<String>,

    /// OCR service API key
    #[arg(long, env = "TERN_OCR_API_KEY")]
    ocr_api_key: Option<String>,

    /// Perceptual-hash service URL
    #[arg(long, env = "TERN_PHASH_URL")]
    phash_url: Option<String>,

    /// Abuse-match service URL
    #[arg(long, env = "TERN_ABUSE_URL")]
    abuse_url: Option<String>,

    /// Abuse-match service admin password
    #[arg(long, env = "TERN_ABUSE_ADMIN_PASSWORD")]
    abuse_admin_password: Option<String>,

    /// Enrich DELETE commits too
    #[arg(long, env = "TERN_ENRICH_DELETES")]
    enrich_deletes: bool,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9091")]
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
                .add_directive("tern_enricher=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    if args.metrics_port > 0 {
        let handle = init_metrics();
        start_metrics_server(args.metrics_port, handle).await?;
    }

    let clients = build_clients(&args);

    let enricher_args = EnricherArgs {
        bootstrap_servers: args.bootstrap_servers.clone(),
        input_topic: args.input_topic.clone(),
        output_topic: args.output_topic.clone(),
        consumer_group: args.consumer_group.clone(),
        enrich_deletes: args.enrich_deletes,
    };

    let enricher = Enricher::new(&enricher_args, clients)
        .await
        .context("failed to create enricher")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_exit_signal().await;
        tracing::info!("received OS exit signal");
        signal_token.cancel();
    });

    enricher
        .run(&enricher_args, &shutdown)
        .await
        .context("error running enricher")?;

    tracing::info!("graceful shutdown complete");
    Ok(())
}

fn build_clients(args: &Args) -> Clients {
    let mut clients = Clients::default();

    if let Some(host) = &args.appview_host {
        clients.profile = Some(Arc::new(ProfileClient::new(
            host.clone(),
            args.appview_ratelimit_bypass.clone(),
            0,
            Duration::ZERO,
        )));
        tracing::info!(host = %host, "initialized profile client");
    }

    if let (Some(host), Some(token)) = (&args.ozone_host, &args.ozone_admin_token) {
        clients.mod_repo = Some(Arc::new(ModRepoClient::new(
            host.clone(),
            token.clone(),
            50_000,
            Duration::from_secs(60),
        )));
        tracing::info!(host = %host, "initialized moderation-repo client");
    }

    if let Some(host) = &args.plc_host {
        clients.identity = Some(Arc::new(DidClient::new(
            host.clone(),
            50_000,
            Duration::from_secs(60),
            100_000,
            Duration::from_secs(3600),
        )));
        tracing::info!(host = %host, "initialized identity client");
    }

    if let Some(host) = &args.cdn_host {
        clients.cdn = Some(Arc::new(CdnClient::new(
            host.clone(),
            10_000,
            Duration::from_secs(60),
        )));
        tracing::info!(host = %host, "initialized CDN client");
    }

    if let Some(host) = &args.prescreen_host {
        clients.prescreen = Some(Arc::new(PrescreenClient::new(host.clone())));
        tracing::info!(host = %host, "initialized prescreen client");
    }

    if let (Some(url), Some(token)) = (&args.classifier_url, &args.classifier_token) {
        clients.classifier = Some(Arc::new(ClassifierClient::new(url.clone(), token.clone())));
        tracing::info!(url = %url, "initialized classifier client");
    }

    if let (Some(url), Some(key)) = (&args.ocr_url, &args.ocr_api_key) {
        clients.ocr = Some(Arc::new(OcrClient::new(url.clone(), key.clone())));
        tracing::info!(url = %url, "initialized OCR client");
    }

    if let Some(url) = &args.phash_url {
        clients.phash = Some(Arc::new(PhashClient::new(url.clone())));
        tracing::info!(url = %url, "initialized perceptual-hash client");
    }

    if let (Some(url), Some(password)) = (&args.abuse_url, &args.abuse_admin_password) {
        clients.abuse = Some(Arc::new(AbuseClient::new(url.clone(), password.clone())));
        tracing::info!(url = %url, "initialized abuse-match client");
    }

    clients
}

async fn wait_for_exit_signal() {
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("sigterm handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
