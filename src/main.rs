//! Attune Engine CLI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use attune_engine::{
    pipeline::CycleDriver, store::EventStore, ActionSuggestion, Config, EventKind, FeatureWindow,
    MemoryStore, RawEvent, RuleCatalog, VERSION,
};

#[derive(Parser)]
#[command(name = "attune")]
#[command(version = VERSION)]
#[command(about = "Behavioral telemetry aggregation and intervention engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the telemetry server and the aggregation loop
    #[cfg(feature = "server")]
    Serve {
        /// Port to bind (overrides configuration)
        #[arg(long)]
        port: Option<u16>,

        /// Rule catalog path (overrides configuration)
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Feature window length in seconds
        #[arg(long)]
        window_secs: Option<u64>,

        /// Aggregation tick interval in seconds
        #[arg(long)]
        tick_secs: Option<u64>,
    },

    /// Run the pipeline once over a recorded event file (JSON lines)
    Replay {
        /// Event file: one JSON event per line
        #[arg(long, short)]
        events: PathBuf,

        /// Rule catalog path (overrides configuration)
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Feature window length in seconds
        #[arg(long)]
        window_secs: Option<u64>,
    },

    /// Validate and list a rule catalog
    Rules {
        /// Catalog path (overrides configuration)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        #[cfg(feature = "server")]
        Commands::Serve {
            port,
            rules,
            window_secs,
            tick_secs,
        } => cmd_serve(port, rules, window_secs, tick_secs).await,
        Commands::Replay {
            events,
            rules,
            window_secs,
        } => cmd_replay(events, rules, window_secs).await,
        Commands::Rules { path } => cmd_rules(path),
        Commands::Config => cmd_config(),
    }
}

fn load_catalog(config: &Config, override_path: Option<PathBuf>) -> anyhow::Result<RuleCatalog> {
    let path = override_path.unwrap_or_else(|| config.rules_path.clone());
    let catalog = RuleCatalog::load(&path)
        .with_context(|| format!("loading rule catalog from {}", path.display()))?;
    if catalog.is_empty() {
        tracing::warn!(path = %path.display(), "rule catalog is empty; no actions will ever be suggested");
    }
    Ok(catalog)
}

#[cfg(feature = "server")]
async fn cmd_serve(
    port: Option<u16>,
    rules: Option<PathBuf>,
    window_secs: Option<u64>,
    tick_secs: Option<u64>,
) -> anyhow::Result<()> {
    use attune_engine::server::{self, ServerConfig, SessionRegistry};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    let mut config = Config::load().context("loading configuration")?;
    if let Some(secs) = window_secs {
        config.window = Duration::from_secs(secs);
    }
    if let Some(secs) = tick_secs {
        config.tick_interval = Duration::from_secs(secs);
    }
    let port = port.unwrap_or(config.bind_port);

    let catalog = Arc::new(load_catalog(&config, rules)?);

    let store = Arc::new(MemoryStore::new());
    server::wait_for_store(store.as_ref(), 20, Duration::from_secs(2))
        .await
        .context("event store never became ready")?;

    let registry = SessionRegistry::new();
    let (addr, shutdown_tx) =
        server::run(ServerConfig { port }, store.clone(), registry.clone()).await?;

    tracing::info!(
        rules = catalog.len(),
        window_secs = config.window.as_secs(),
        tick_secs = config.tick_interval.as_secs(),
        %addr,
        "engine started"
    );

    let cancel = CancellationToken::new();
    let driver = Arc::new(CycleDriver::new(
        store.clone(),
        catalog,
        config.pipeline_settings(),
    ));
    let stats = driver.stats_handle();

    let loop_handle = tokio::spawn(attune_engine::pipeline::scheduler::run(
        driver,
        config.tick_interval,
        cancel.clone(),
    ));
    let dispatch_handle = tokio::spawn(server::run_dispatcher(
        store.clone(),
        registry,
        config.tick_interval,
        cancel.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutting down");

    cancel.cancel();
    let _ = shutdown_tx.send(());
    let _ = loop_handle.await;
    let _ = dispatch_handle.await;

    println!("{}", stats.summary());
    Ok(())
}

/// One line of a replay file.
#[derive(Deserialize)]
struct ReplayEvent {
    user_id: String,
    #[serde(rename = "type", alias = "event_type")]
    kind: EventKind,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    session_id: Option<String>,
    ts: DateTime<Utc>,
}

#[derive(Serialize)]
struct ReplayReport {
    user_id: String,
    window: FeatureWindow,
    actions: Vec<ActionSuggestion>,
}

async fn cmd_replay(
    events_path: PathBuf,
    rules: Option<PathBuf>,
    window_secs: Option<u64>,
) -> anyhow::Result<()> {
    let mut config = Config::load().context("loading configuration")?;
    if let Some(secs) = window_secs {
        config.window = std::time::Duration::from_secs(secs);
    }
    let catalog = Arc::new(load_catalog(&config, rules)?);

    let content = std::fs::read_to_string(&events_path)
        .with_context(|| format!("reading {}", events_path.display()))?;

    let store = Arc::new(MemoryStore::new());
    let mut latest: Option<DateTime<Utc>> = None;
    let mut skipped = 0usize;

    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ReplayEvent>(line) {
            Ok(replay) => {
                latest = Some(latest.map_or(replay.ts, |t| t.max(replay.ts)));
                let event = RawEvent {
                    id: uuid::Uuid::new_v4(),
                    user_id: replay.user_id,
                    session_id: replay.session_id,
                    kind: replay.kind,
                    payload: replay.payload,
                    timestamp: replay.ts,
                };
                store
                    .append(event)
                    .await
                    .map_err(|e| anyhow::anyhow!("appending replay event: {e}"))?;
            }
            Err(error) => {
                skipped += 1;
                tracing::warn!(line = lineno + 1, %error, "skipping malformed event line");
            }
        }
    }

    let now = latest.context("event file contains no parsable events")?;
    if skipped > 0 {
        tracing::warn!(skipped, "some lines were not replayed");
    }

    let driver = CycleDriver::new(store.clone(), catalog, config.pipeline_settings());
    driver.run_cycle(now).await;

    let lookback = chrono::Duration::milliseconds(
        (config.window.as_millis() as i64) * config.lookback_factor as i64,
    );
    let users = store
        .active_users(now - lookback)
        .await
        .map_err(|e| anyhow::anyhow!("scanning users: {e}"))?;

    let mut reports = Vec::new();
    for user_id in users {
        let actions: Vec<ActionSuggestion> = store
            .actions_for_user(&user_id, now, usize::MAX)
            .await
            .map_err(|e| anyhow::anyhow!("reading actions: {e}"))?
            .into_iter()
            .filter_map(|e| serde_json::from_value(e.payload).ok())
            .collect();

        if let Some(window) = store.feature_windows_for_user(&user_id).await.into_iter().next() {
            reports.push(ReplayReport {
                user_id,
                window,
                actions,
            });
        }
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn cmd_rules(path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;
    let catalog = load_catalog(&config, path)?;

    println!("Rule catalog: {} rule(s)", catalog.len());
    println!();
    for rule in catalog.rules() {
        let condition =
            serde_json::to_string(&rule.condition).unwrap_or_else(|_| "{}".to_string());
        println!(
            "  [{:>4}] {:<32} when {}",
            rule.priority, rule.id, condition
        );
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
