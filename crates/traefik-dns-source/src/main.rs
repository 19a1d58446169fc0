use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::Client;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use traefik_dns_source::config::{ConfigOverrides, SourceConfig};
use traefik_dns_source::health::{run_health_server, HealthState};
use traefik_dns_source::lister::served_groups;
use traefik_dns_source::retry::Backoff;
use traefik_dns_source::{
    ApiLister, Endpoint, ListError, ReflectorLister, SnapshotLister, Source, TraefikSource,
};

const DEFAULT_LOG_FILTER: &str = "info,traefik_dns_source=debug";

#[derive(Parser, Debug)]
#[command(name = "traefik-dns-source")]
#[command(about = "DNS endpoints from Traefik IngressRoute resources", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Namespace to read; empty for all namespaces
    #[arg(long, global = true)]
    namespace: Option<String>,

    /// Selector evaluated against annotations (e.g. kubernetes.io/ingress.class=traefik)
    #[arg(long, global = true)]
    annotation_filter: Option<String>,

    /// Use only match expressions, ignoring the hostname annotation
    #[arg(long, global = true)]
    ignore_hostname_annotation: bool,

    /// Do not read the traefik.containo.us API group
    #[arg(long, global = true)]
    disable_legacy: bool,

    /// Do not read the traefik.io API group
    #[arg(long, global = true)]
    disable_new: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the cluster and compute endpoints on every resync
    Run {
        /// Seconds between endpoint computations
        #[arg(long)]
        resync_interval: Option<u64>,

        /// Port for /healthz and /readyz
        #[arg(long)]
        health_port: Option<u16>,

        /// Seconds to wait for the initial watch sync before giving up
        #[arg(long)]
        sync_timeout: Option<u64>,

        /// List from the API server on every pass instead of watching
        #[arg(long)]
        direct: bool,
    },
    /// Print endpoints for manifest files as JSON, without a cluster
    Render {
        /// Multi-document YAML manifest files
        #[arg(short, long = "file", required = true)]
        files: Vec<PathBuf>,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let (resync_interval_seconds, health_port, sync_timeout_seconds) = match &self.command {
            Commands::Run {
                resync_interval,
                health_port,
                sync_timeout,
                ..
            } => (*resync_interval, *health_port, *sync_timeout),
            Commands::Render { .. } => (None, None, None),
        };

        ConfigOverrides {
            namespace: self.namespace.clone(),
            annotation_filter: self.annotation_filter.clone(),
            ignore_hostname_annotation: self.ignore_hostname_annotation.then_some(true),
            disable_legacy: self.disable_legacy.then_some(true),
            disable_new: self.disable_new.then_some(true),
            resync_interval_seconds,
            health_port,
            sync_timeout_seconds,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so render output stays clean on stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false),
        )
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let config = SourceConfig::load(cli.config.as_deref(), &cli.overrides())
        .context("Failed to load configuration")?;

    debug!(
        namespace = %config.namespace,
        annotation_filter = %config.annotation_filter,
        ignore_hostname_annotation = config.ignore_hostname_annotation,
        groups = ?config.api_groups(),
        "Loaded configuration"
    );

    match cli.command {
        Commands::Run { direct, .. } => run(config, direct).await,
        Commands::Render { files, pretty } => render(&config, &files, pretty).await,
    }
}

async fn run(config: SourceConfig, direct: bool) -> Result<()> {
    info!("traefik-dns-source starting");

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    info!("Connected to Kubernetes cluster");

    let health = Arc::new(HealthState::new());
    let health_port = config.health_port;
    let health_state = health.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_state, health_port).await {
            error!(error = %e, "Health check server failed");
        }
    });

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone())?;

    let interval = Duration::from_secs(config.resync_interval_seconds);
    let groups = served_groups(&client, &config.api_groups())
        .await
        .context("Failed to discover Traefik API groups")?;

    if direct {
        let lister = ApiLister::new(client, &config.namespace, &groups);
        let source =
            TraefikSource::from_config(lister, &config).context("Invalid source configuration")?;
        health.mark_synced();
        resync_loop(&source, &health, interval, &cancel).await;
    } else {
        let lister = ReflectorLister::start(client, &config.namespace, &groups);
        let source =
            TraefikSource::from_config(lister, &config).context("Invalid source configuration")?;

        let sync_timeout = Duration::from_secs(config.sync_timeout_seconds);
        match source.lister().wait_until_ready(&cancel, sync_timeout).await {
            Ok(()) => health.mark_synced(),
            Err(ListError::Cancelled) => {
                info!("Shutdown requested before caches synced");
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to sync watch caches"),
        }

        resync_loop(&source, &health, interval, &cancel).await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Cancel `cancel` on SIGTERM or SIGINT
fn spawn_signal_handler(cancel: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    tokio::spawn(async move {
        select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
        cancel.cancel();
    });

    Ok(())
}

/// Compute endpoints every `interval` until cancelled, backing off on failure
async fn resync_loop<S: Source>(
    source: &S,
    health: &HealthState,
    interval: Duration,
    cancel: &CancellationToken,
) {
    let mut backoff = Backoff::new();
    let mut previous: Option<Vec<Endpoint>> = None;

    info!(interval_secs = interval.as_secs(), "Starting resync loop");

    loop {
        let delay = match source.endpoints(cancel).await {
            Ok(endpoints) => {
                backoff.reset();
                health.record_pass(true);
                log_endpoints(&endpoints, previous.as_deref());
                previous = Some(endpoints);
                interval
            }
            Err(e) if e.is_cancelled() => break,
            Err(e) => {
                health.record_pass(false);
                error!(error = %e, "Endpoint computation failed");
                backoff.on_failure(&e)
            }
        };

        select! {
            _ = cancel.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }
}

fn log_endpoints(endpoints: &[Endpoint], previous: Option<&[Endpoint]>) {
    let json = match serde_json::to_string(endpoints) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to serialize endpoints");
            return;
        }
    };

    if previous == Some(endpoints) {
        debug!(count = endpoints.len(), "Endpoints unchanged");
    } else {
        info!(count = endpoints.len(), endpoints = %json, "Endpoints changed");
    }
}

async fn render(config: &SourceConfig, files: &[PathBuf], pretty: bool) -> Result<()> {
    let lister = SnapshotLister::with_groups(config.namespace.clone(), &config.api_groups());

    for file in files {
        let contents = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let loaded = lister
            .load_manifests(&contents)
            .with_context(|| format!("Invalid manifests in {}", file.display()))?;
        debug!(file = %file.display(), objects = loaded, "Loaded manifests");
    }

    let source =
        TraefikSource::from_config(lister, config).context("Invalid source configuration")?;
    let endpoints = source
        .endpoints(&CancellationToken::new())
        .await
        .context("Failed to compute endpoints")?;

    let output = if pretty {
        serde_json::to_string_pretty(&endpoints)?
    } else {
        serde_json::to_string(&endpoints)?
    };
    println!("{output}");

    Ok(())
}
