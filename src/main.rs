//! hakeeper - Active/Standby Coordination for Replicated Services
//!
//! Runs one node: health registration, leader election and the
//! periodic caretaking jobs.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hakeeper::config::{KeeperConfig, StoreKind, StrategyKind};
use hakeeper::error::Result;
use hakeeper::health::MYSQL_SCHEMA;
use hakeeper::keeper::Keeper;

/// hakeeper - Active/Standby Coordination for Replicated Services
#[derive(Parser)]
#[command(name = "hakeeper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "hakeeper.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "hakeeper.toml")]
        output: PathBuf,

        /// Shared store backend (mysql or sqlite)
        #[arg(long, default_value = "mysql")]
        backend: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,

    /// Print the MySQL schema for the shared store
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => run_start(cli.config, cli.log_level).await,
        Commands::Init { output, backend } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
            run_init(output, &backend)
        }
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
        Commands::Schema => {
            run_schema();
            Ok(())
        }
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start the node and run until interrupted
async fn run_start(config_path: PathBuf, log_level: Option<String>) -> Result<()> {
    let config = match KeeperConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            init_logging(log_level.as_deref().unwrap_or("info"), "pretty");
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            return Err(e);
        }
    };

    let level = log_level.unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, &config.logging.format);
    tracing::info!("Starting hakeeper node ({} strategy)...", config.election.strategy);

    if let Err(e) = std::fs::create_dir_all(config.data_dir()) {
        tracing::error!("Failed to create data directory {:?}: {}", config.data_dir(), e);
        return Err(e.into());
    }

    // The binary ships no consensus engine; hosts embedding one call Keeper::build directly
    let keeper = match Keeper::build(config, None).await {
        Ok(k) => k,
        Err(e) => {
            tracing::error!("Failed to initialize node: {}", e);
            return Err(e);
        }
    };

    tokio::select! {
        result = keeper.run() => {
            if let Err(e) = result {
                tracing::error!("Node stopped: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    Ok(())
}

/// Write a sample configuration file
fn run_init(output: PathBuf, backend: &str) -> Result<()> {
    let database = match backend {
        "sqlite" => r#"[database]
backend = "sqlite"
# sqlite_path = "/var/lib/hakeeper/keeper.db""#
            .to_string(),
        _ => r#"[database]
backend = "mysql"
host = "localhost"
port = 3306
user = "hakeeper"
password = "changeme"
database = "hakeeper"
pool_size = 10
connect_timeout_secs = 30"#
            .to_string(),
    };

    let config_content = format!(
        r#"# hakeeper Configuration
# Generated configuration file

[node]
# hostname = "db-1.example.com"
data_dir = "/var/lib/hakeeper"
execution_mode = "ServiceMode"
command = ""

{database}

[election]
strategy = "lease"
health_poll_seconds = 1
active_node_expire_seconds = 5
unseen_history_hours = 240
# consensus_bind = "10.0.0.1:10008"
# consensus_nodes = ["10.0.0.1:10008", "10.0.0.2:10008", "10.0.0.3:10008"]

[snapshot]
retain = 10

[scheduler]
domain_check_interval_seconds = 60
leader_domain = ""
switch_domain_commands = []
domain_reconcile = "all-nodes"
cluster_status_interval_seconds = 60
cluster_status_alert_command = ""

# [[scripts]]
# script = "/usr/local/bin/rotate-logs"
# run_interval_seconds = 300
# capture_output = false

[logging]
level = "info"
format = "pretty"
"#
    );

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to configure your store and election settings.");
    if backend != "sqlite" {
        println!("Create the tables with: hakeeper schema | mysql hakeeper");
    }
    println!("Then start with: hakeeper --config {} start", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match KeeperConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Strategy: {}", config.election.strategy);
            println!("  Store: {}", config.storage_backend_descriptor());
            println!("  Poll Interval: {}s", config.election.health_poll_seconds);
            if config.election.strategy == StrategyKind::Consensus {
                println!("  Consensus Nodes: {}", config.election.consensus_nodes.len());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show node information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = KeeperConfig::from_file(&config_path)?;

    println!("hakeeper Node Information");
    println!("=========================");
    println!();
    println!("Hostname:         {}", config.node.hostname.as_deref().unwrap_or("(system)"));
    println!("Execution Mode:   {}", config.node.execution_mode);
    println!("Data Directory:   {}", config.data_dir().display());
    println!();
    println!("Store Configuration:");
    match config.database.backend {
        StoreKind::Mysql => {
            println!("  Backend:        mysql");
            println!("  Host:           {}:{}", config.database.host, config.database.port);
            println!("  Database:       {}", config.database.database);
            println!("  Pool Size:      {}", config.database.pool_size);
        }
        StoreKind::Sqlite => {
            println!("  Backend:        sqlite");
            println!("  Path:           {}", config.sqlite_path().display());
        }
    }
    println!();
    println!("Election Configuration:");
    println!("  Strategy:       {}", config.election.strategy);
    println!("  Poll Interval:  {}s", config.election.health_poll_seconds);
    println!("  Lease Expiry:   {}s", config.election.active_node_expire_seconds);
    println!("  History Kept:   {}h", config.election.unseen_history_hours);
    if config.election.strategy == StrategyKind::Consensus {
        println!("  Bind:           {}", config.election.consensus_bind);
        println!("  Advertise:      {}", config.election.consensus_advertise());
        println!("  Nodes:          {:?}", config.election.consensus_nodes);
        println!("  Snapshots Kept: {}", config.snapshot.retain);
    }
    println!();
    println!("Scheduler:");
    println!("  Leader Domain:  {}", if config.scheduler.leader_domain.is_empty() { "(none)" } else { &config.scheduler.leader_domain });
    println!("  Scripts:        {}", config.scripts.len());

    Ok(())
}

/// Print the shared store DDL
fn run_schema() {
    for stmt in MYSQL_SCHEMA {
        println!("{};\n", stmt);
    }
}
