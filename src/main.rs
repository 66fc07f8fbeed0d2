//! beacon - quick-launcher daemon and command line client

use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use beacon::config::Config;
use beacon::coordinator::Coordinator;
use beacon::database::Database;
use beacon::indexer::{start_watcher, ChangeBridge};
use beacon::ipc::{IpcClient, IpcServer};
use beacon::platform;
use beacon::source::{EntityResolver, FsResolver};

/// beacon - application, file and action launcher
#[derive(Parser)]
#[command(name = "beacon")]
#[command(author = "Misha")]
#[command(version = "0.1.0")]
#[command(about = "Quick-launcher indexing and ranking daemon", long_about = None)]
struct Cli {
    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the launcher daemon
    Daemon,

    /// Search for candidates
    Search {
        /// Search query; leave empty to browse by usage
        #[arg(default_value = "")]
        query: String,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Select a candidate and print its launch descriptor
    Select {
        /// Candidate id, as printed by `search`
        id: String,
    },

    /// Show index status
    Status,

    /// Trigger a full rescan
    Reindex,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.db_path = path.with_file_name("usage.db");
            config
        }
        None => Config::load()?,
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.service.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    match cli.command {
        Commands::Daemon => {
            info!("Starting beacon daemon...");
            run_daemon(config).await?;
        }

        Commands::Search { query, limit } => {
            search(&config, &query, limit).await?;
        }

        Commands::Select { id } => {
            select(&config, &id).await?;
        }

        Commands::Status => {
            show_status(&config).await?;
        }

        Commands::Reindex => {
            IpcClient::new(config.get_socket_path()).reindex().await?;
            println!("Full reindex triggered");
        }

        Commands::Config => {
            show_config(&config)?;
        }
    }

    Ok(())
}

/// Run the main daemon process
async fn run_daemon(config: Config) -> Result<()> {
    let db = Database::open(&config.db_path)?;
    info!("Usage database at {:?}", db.path());

    let resolver: Arc<dyn EntityResolver> = Arc::new(FsResolver::new(&config)?);
    let coordinator = Arc::new(Coordinator::new(
        config.clone(),
        Arc::clone(&resolver),
        Some(db),
    )?);

    // Watch before scanning so nothing changed during the scan is missed
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (mutations_tx, mutations_rx) = mpsc::channel(config.watcher.queue_capacity.max(1));

    let watcher = if config.watcher.enabled {
        match start_watcher(&config, events_tx, Arc::new(AtomicU64::new(0))) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("File watcher unavailable: {:#}", e);
                None
            }
        }
    } else {
        info!("File watching disabled");
        drop(events_tx);
        None
    };

    let bridge = ChangeBridge::new(&config.watcher, Arc::clone(&resolver), mutations_tx);
    let bridge_task = tokio::spawn(bridge.run(events_rx));
    let consumer_task = tokio::spawn(Arc::clone(&coordinator).consume(mutations_rx));

    // Initial scan in background
    let scan_coordinator = Arc::clone(&coordinator);
    tokio::spawn(async move {
        if let Err(e) = scan_coordinator.rescan().await {
            error!("Initial scan failed: {:#}", e);
        }
    });

    let flush_coordinator = Arc::clone(&coordinator);
    let flush_every = Duration::from_secs(config.usage.flush_interval_secs.max(1));
    let flush_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(flush_every);
        loop {
            ticker.tick().await;
            let coordinator = Arc::clone(&flush_coordinator);
            // Failures are logged and retried on the next tick
            let _ = tokio::task::spawn_blocking(move || coordinator.flush_usage()).await;
        }
    });

    let check_task = (config.performance.consistency_check_secs > 0).then(|| {
        let check_coordinator = Arc::clone(&coordinator);
        let check_every = Duration::from_secs(config.performance.consistency_check_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = check_coordinator.verify_or_rebuild().await {
                    error!("Consistency check failed: {:#}", e);
                }
            }
        })
    });

    let server = IpcServer::new(Arc::clone(&coordinator), config.get_socket_path());
    let mut shutdown = platform::setup_signal_handlers()?;

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = shutdown.recv() => {
            info!("Shutting down...");
        }
    }

    if let Some(task) = check_task {
        task.abort();
    }
    flush_task.abort();

    // Dropping the watcher closes the event stream; the bridge drains what is pending
    drop(watcher);
    if tokio::time::timeout(Duration::from_secs(2), bridge_task).await.is_err() {
        warn!("Change bridge did not stop in time");
    }
    if tokio::time::timeout(Duration::from_secs(2), consumer_task).await.is_err() {
        warn!("Mutation consumer did not stop in time");
    }

    let final_flush = Arc::clone(&coordinator);
    tokio::task::spawn_blocking(move || final_flush.flush_usage())
        .await
        .context("Final usage flush panicked")??;

    if let Err(e) = std::fs::remove_file(server.socket_path()) {
        warn!("Failed to remove socket {:?}: {}", server.socket_path(), e);
    }
    info!("Shutdown complete");
    Ok(())
}

/// Search via IPC client
async fn search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    let client = IpcClient::new(config.get_socket_path());
    let results = client.search(query, limit).await?;

    for hit in &results.hits {
        println!("  {:<12} {:>6.3}  {}  [{}]", hit.kind.as_str(), hit.score, hit.display_name, hit.id);
    }

    println!();
    print!("{} results in {}ms", results.hits.len(), results.query_time_ms);
    if results.timed_out {
        print!(" (partial, latency budget exceeded)");
    }
    println!();

    Ok(())
}

/// Select via IPC client and print the launch descriptor
async fn select(config: &Config, id: &str) -> Result<()> {
    let client = IpcClient::new(config.get_socket_path());
    let launch = client.select(id).await?;
    println!("{}", serde_json::to_string_pretty(&launch)?);
    Ok(())
}

/// Show index status via IPC client
async fn show_status(config: &Config) -> Result<()> {
    let client = IpcClient::new(config.get_socket_path());
    let status = client.status().await?;

    println!("beacon status");
    println!("=============");
    println!("Applications:     {}", status.applications);
    println!("Actions:          {}", status.actions);
    println!("Files:            {}", status.files);
    println!("Tokens:           {}", status.tokens);
    println!("Usage records:    {}", status.usage_records);
    println!("Rebuilds:         {}", status.rebuilds);
    println!("Is scanning:      {}", status.is_scanning);

    Ok(())
}

/// Show the effective configuration
fn show_config(config: &Config) -> Result<()> {
    println!("# {}", config.config_path.display());
    println!("# usage database: {}", config.db_path.display());
    println!();
    println!("{}", toml::to_string_pretty(config).context("Failed to serialize config")?);

    println!("# application directories, in precedence order:");
    for dir in config.application_dirs() {
        println!("#   {}", dir.display());
    }
    Ok(())
}
