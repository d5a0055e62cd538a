//! SafeHook - Compliance-gated, field-encrypted event delivery
//!
//! Runs the audit API with the retention sweep, manages endpoints, routes
//! events, and offers offline classification and endpoint checks.
//!
//! Records persist under `--data-dir` (or `store.data_dir`). Without one,
//! `serve` and `deliver` keep records in memory for the life of the process.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use safehook::{
    config::SafeHookConfig,
    models::{EndpointConfig, Environment, OutboundEvent, SensitivityLevel},
    store::EndpointFilter,
    Collaborators, SafeHook,
};
use std::path::{Path, PathBuf};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "safehook")]
#[command(version)]
#[command(about = "Compliance-gated, field-encrypted event delivery")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SAFEHOOK_CONFIG")]
    config: Option<PathBuf>,

    /// Record store directory (overrides config)
    #[arg(short, long, env = "SAFEHOOK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the audit API and run the retention sweep over the data directory
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Classify a JSON payload
    Classify {
        /// Payload file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Validate an endpoint configuration
    Check {
        /// Endpoint configuration file (JSON)
        #[arg(short, long)]
        file: PathBuf,

        /// Also evaluate a delivery at this sensitivity level
        #[arg(short, long)]
        sensitivity: Option<SensitivityLevel>,
    },

    /// Manage endpoint configurations
    Endpoint {
        #[command(subcommand)]
        action: EndpointCommands,
    },

    /// Route one event to the tenant's endpoints
    Deliver {
        /// Owning tenant
        #[arg(short, long)]
        tenant: String,

        /// Target environment (staging or production)
        #[arg(short, long)]
        environment: Environment,

        /// Event file (JSON with event_type, payload, entity_ids)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Run one retention sweep over the data directory
    Sweep {
        /// Restrict to one tenant
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[derive(Subcommand)]
enum EndpointCommands {
    /// Validate and register an endpoint
    Add {
        /// Endpoint configuration file (JSON)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List registered endpoints
    List {
        /// Restrict to one tenant
        #[arg(short, long)]
        tenant: Option<String>,
    },
}

/// Event as written in a file; id and timestamp are assigned on read
#[derive(serde::Deserialize)]
struct EventFile {
    event_type: String,
    payload: serde_json::Value,
    #[serde(default)]
    entity_ids: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("safehook={},tower_http=debug", log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let mut config = match &cli.config {
        Some(path) => SafeHookConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SafeHookConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.store.data_dir = Some(dir);
    }

    match cli.command {
        Commands::Serve { host, port } => run_server(config, host, port).await?,
        Commands::Classify { file } => classify(&file)?,
        Commands::Check { file, sensitivity } => check(config, &file, sensitivity).await?,
        Commands::Endpoint { action } => endpoint(config, action).await?,
        Commands::Deliver {
            tenant,
            environment,
            file,
        } => deliver(config, &tenant, environment, &file).await?,
        Commands::Sweep { tenant } => sweep(config, tenant).await?,
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

async fn build(config: SafeHookConfig) -> Result<SafeHook> {
    let collaborators = Collaborators::local(&config).await?;
    Ok(SafeHook::new(config, collaborators)?)
}

async fn run_server(mut config: SafeHookConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.api.host = host;
    }
    if let Some(port) = port {
        config.api.port = port;
    }
    let addr = format!("{}:{}", config.api.host, config.api.port);

    tracing::info!("Starting SafeHook");
    let service = build(config).await?;
    let scheduler = service.start_retention();

    let app = service.api_router().layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    tracing::info!(%addr, "Audit API listening. Press Ctrl+C to stop.");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("Shutting down...");
    if let Some(scheduler) = scheduler {
        scheduler.shutdown();
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn classify(file: &Path) -> Result<()> {
    let payload: serde_json::Value = read_json(file)?;
    let classifier = safehook::privacy::Classifier::with_default_rules()?;
    let result = classifier.classify(&payload);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn check(config: SafeHookConfig, file: &Path, sensitivity: Option<SensitivityLevel>) -> Result<()> {
    let endpoint: EndpointConfig = read_json(file)?;
    let service = build(config).await?;
    let now = chrono::Utc::now();

    let creation = service.gate.validate_creation(&endpoint, now);
    println!("Configuration:");
    println!("{}", serde_json::to_string_pretty(&creation)?);

    if let Some(level) = sensitivity {
        let delivery = service.gate.evaluate_delivery(&endpoint, level, now);
        println!("Delivery at '{}':", level);
        println!("{}", serde_json::to_string_pretty(&delivery)?);
    }
    Ok(())
}

async fn endpoint(config: SafeHookConfig, action: EndpointCommands) -> Result<()> {
    if config.store.data_dir.is_none() {
        anyhow::bail!("endpoint commands need a data directory (--data-dir or store.data_dir)");
    }
    let service = build(config).await?;
    match action {
        EndpointCommands::Add { file } => {
            let endpoint: EndpointConfig = read_json(&file)?;
            let created = service.registry.create(endpoint).await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
        EndpointCommands::List { tenant } => {
            let filter = EndpointFilter {
                tenant_id: tenant,
                ..Default::default()
            };
            let endpoints = service.registry.list(&filter).await?;
            println!("{}", serde_json::to_string_pretty(&endpoints)?);
        }
    }
    Ok(())
}

async fn deliver(config: SafeHookConfig, tenant: &str, environment: Environment, file: &Path) -> Result<()> {
    let event: EventFile = read_json(file)?;
    let mut outbound = OutboundEvent::new(event.event_type, event.payload);
    outbound.entity_ids = event.entity_ids;

    let service = build(config).await?;
    let report = service.router.route(tenant, environment, &outbound).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn sweep(config: SafeHookConfig, tenant: Option<String>) -> Result<()> {
    if config.store.data_dir.is_none() {
        anyhow::bail!("sweep needs a data directory (--data-dir or store.data_dir)");
    }
    let service = build(config).await?;
    let report = match tenant {
        Some(tenant) => service.retention.sweep(&[tenant]).await,
        None => service.retention.sweep_all().await?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn show_config(config: Option<&SafeHookConfig>) -> Result<()> {
    let default_config = SafeHookConfig::default();
    let config = config.unwrap_or(&default_config);
    let toml = toml::to_string_pretty(config)?;
    println!("{}", toml);
    Ok(())
}
