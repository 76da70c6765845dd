//! extdb-operator: keeps external database servers in line with a manifest.
//!
//! The daemon:
//! - Loads hosts, databases, users and secrets from a JSON manifest
//! - Verifies connectivity to every host
//! - Creates declared databases and users on their hosts
//! - Resyncs periodically and retries failed passes with backoff

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use extdb_operator::secrets::{EnvSecretStore, LayeredSecretStore, SecretStore, StaticSecretStore};
use extdb_operator::{Context, Controller, Manifest, MemoryStore, ProviderRegistry, Settings};

/// External database operator
#[derive(Parser, Debug)]
#[command(name = "extdb-operator", version, about)]
struct Args {
    /// JSON manifest with hosts, databases, users and secrets
    #[arg(long)]
    manifest: PathBuf,

    /// Full resync interval in seconds
    #[arg(long, default_value = "300")]
    resync_interval: u64,

    /// Connection timeout in seconds
    #[arg(long, default_value = "10")]
    connect_timeout: u64,

    /// Statement timeout in seconds
    #[arg(long, default_value = "30")]
    statement_timeout: u64,

    /// Reconciliations allowed in flight at once
    #[arg(long, default_value = "4")]
    max_concurrent: usize,

    /// First retry delay after a failed pass, in seconds
    #[arg(long, default_value = "5")]
    backoff_base: u64,

    /// Upper bound of the retry delay, in seconds
    #[arg(long, default_value = "300")]
    backoff_max: u64,

    /// Also look secrets up in <PREFIX>_<NAMESPACE>_<NAME>_<KEY> env vars
    #[arg(long)]
    secret_env_prefix: Option<String>,

    /// Reconcile everything once and exit (non-zero if anything failed)
    #[arg(long)]
    once: bool,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            statement_timeout: Duration::from_secs(self.statement_timeout),
            resync_interval: Duration::from_secs(self.resync_interval),
            max_concurrent: self.max_concurrent,
            backoff_base: Duration::from_secs(self.backoff_base),
            backoff_max: Duration::from_secs(self.backoff_max),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "extdb_operator=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("Starting extdb-operator");
    info!("Manifest: {}", args.manifest.display());

    let manifest = Manifest::load(&args.manifest)
        .await
        .context("Failed to load manifest")?;

    let store = Arc::new(MemoryStore::new());
    let static_secrets = Arc::new(StaticSecretStore::new());
    manifest
        .apply(&store, &static_secrets)
        .await
        .context("Failed to seed store from manifest")?;

    let mut layers: Vec<Arc<dyn SecretStore>> = Vec::new();
    layers.push(static_secrets);
    if let Some(prefix) = &args.secret_env_prefix {
        info!("Secrets fall back to environment variables prefixed {}", prefix);
        layers.push(Arc::new(EnvSecretStore::new(prefix.clone())));
    }

    let registry = ProviderRegistry::with_defaults();
    info!("Providers: {:?}", registry.engines());

    let ctx = Context::new(
        store,
        registry,
        Arc::new(LayeredSecretStore::new(layers)),
        args.settings(),
    );
    let controller = Controller::new(ctx);

    if args.once {
        let summary = controller.sync_all().await;
        if summary.failed > 0 {
            anyhow::bail!(
                "{} of {} records failed to converge",
                summary.failed,
                summary.failed + summary.succeeded
            );
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let controller_handle = tokio::spawn(controller.run(shutdown_rx));

    // Wait for shutdown signal
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;
    tokio::select! {
        _ = signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    let _ = shutdown_tx.send(true);
    controller_handle
        .await
        .context("Controller task failed")?;

    info!("Shutdown complete");
    Ok(())
}
