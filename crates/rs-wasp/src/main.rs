//! rs-wasp - committee node for smart contracts on a value ledger
//!
//! This binary runs a node that serves the contracts whose committees it is
//! a member of, and manages the node registry.
//!
//! ## Usage
//!
//! ```text
//! rs-wasp run                              # Run the node
//! rs-wasp run --dev-cluster 4              # Run a local 4-node committee
//! rs-wasp new-db                           # Create a new database
//! rs-wasp gen-dkshare --nodes a:1,b:2 ...  # Install a dev key share
//! rs-wasp contracts                        # List registered contracts
//! rs-wasp info                             # Print node information
//! ```
//!
//! ## Configuration
//!
//! Configuration can be provided via a TOML file or `RS_WASP_*` environment
//! variables. See `rs-wasp sample-config` for every option.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use wasp_app::{
    logging, run_node, AppConfig, DevClusterOptions, DevContract, LogConfig, LogFormat, NodeContext,
    Registry, RunOptions,
};
use wasp_common::Address;

/// Committee node for ledger-anchored smart contracts
#[derive(Parser)]
#[command(name = "rs-wasp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Log output format
    #[arg(long, default_value = "text", global = true)]
    log_format: CliLogFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Log output format for CLI
#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum CliLogFormat {
    #[default]
    Text,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => LogFormat::Text,
            CliLogFormat::Json => LogFormat::Json,
        }
    }
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run {
        /// Run a whole committee of this many nodes in one process
        #[arg(long, value_name = "N")]
        dev_cluster: Option<u16>,

        /// Quorum of the dev committee (default 2N/3 + 1)
        #[arg(long, requires = "dev_cluster")]
        quorum: Option<u16>,

        /// Seed the dev contract is derived from
        #[arg(long, default_value = "rs-wasp dev")]
        seed: String,

        /// Milliseconds between dev counter requests, 0 to disable
        #[arg(long, default_value = "5000")]
        request_interval_ms: u64,

        /// Seconds between status reports
        #[arg(long, default_value = "30")]
        status_interval: u64,
    },

    /// Create a new database
    NewDb {
        /// Path to the database file (overrides config)
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,

        /// Force creation even if database exists
        #[arg(long)]
        force: bool,
    },

    /// Derive a dev contract from a seed and install this node's key share
    GenDkshare {
        /// Seed shared by every node of the committee
        #[arg(long)]
        seed: String,

        /// Committee node locations in peer index order
        #[arg(long, value_delimiter = ',', required = true)]
        nodes: Vec<String>,

        /// Quorum T
        #[arg(long)]
        quorum: u16,

        /// Peer index of this node (default: position of the configured location)
        #[arg(long)]
        index: Option<u16>,

        /// Register the contract without activating it
        #[arg(long)]
        inactive: bool,
    },

    /// Activate a registered contract
    Activate {
        /// Contract address (hex)
        address: String,
    },

    /// Deactivate a registered contract
    Deactivate {
        /// Contract address (hex)
        address: String,
    },

    /// List registered contracts
    Contracts,

    /// Print node information
    Info,

    /// Print sample configuration
    SampleConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run {
            dev_cluster,
            quorum,
            seed,
            request_interval_ms,
            status_interval,
        } => {
            let options = RunOptions {
                dev_cluster: dev_cluster.map(|size| DevClusterOptions {
                    size,
                    quorum,
                    seed,
                    request_interval: Duration::from_millis(request_interval_ms),
                }),
                status_interval: Duration::from_secs(status_interval),
            };
            run_node(config, options).await
        }

        Commands::NewDb { path, force } => cmd_new_db(config, path, force),

        Commands::GenDkshare {
            seed,
            nodes,
            quorum,
            index,
            inactive,
        } => cmd_gen_dkshare(config, &seed, nodes, quorum, index, !inactive),

        Commands::Activate { address } => cmd_set_active(config, &address, true),

        Commands::Deactivate { address } => cmd_set_active(config, &address, false),

        Commands::Contracts => cmd_contracts(config),

        Commands::Info => cmd_info(config),

        Commands::SampleConfig => cmd_sample_config(),
    }
}

/// Initialize the logging subsystem.
fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };

    let config = LogConfig::default().with_level(level);

    let config = match cli.log_format {
        CliLogFormat::Text => config,
        CliLogFormat::Json => LogConfig {
            format: cli.log_format.into(),
            ansi_colors: false,
            ..config
        },
    };

    logging::init(&config)?;

    tracing::debug!("Logging initialized");
    Ok(())
}

/// Load configuration from file or use defaults.
fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let config = if let Some(ref config_path) = cli.config {
        tracing::info!(path = ?config_path, "Loading configuration from file");
        AppConfig::from_file_with_env(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        config
    };

    Ok(config)
}

fn open_registry(config: &AppConfig) -> anyhow::Result<Registry> {
    if !config.database.in_memory && !config.database.path.exists() {
        anyhow::bail!(
            "Database does not exist at {:?}. Run 'new-db' to create it.",
            config.database.path
        );
    }
    let store = NodeContext::open_store(&config.database)?;
    Ok(Registry::new(store))
}

fn parse_address(address: &str) -> anyhow::Result<Address> {
    Address::from_hex(address).with_context(|| format!("invalid contract address {:?}", address))
}

/// New database command handler.
fn cmd_new_db(mut config: AppConfig, path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    if let Some(p) = path {
        config.database.path = p;
    }
    config.database.in_memory = false;

    let db_path = &config.database.path;

    if db_path.exists() {
        if force {
            tracing::warn!(path = ?db_path, "Removing existing database");
            std::fs::remove_file(db_path)?;
        } else {
            anyhow::bail!(
                "Database already exists at {:?}. Use --force to overwrite.",
                db_path
            );
        }
    }

    tracing::info!(path = ?db_path, "Creating new database");
    let _store = NodeContext::open_store(&config.database)?;

    println!("Database created successfully at: {}", db_path.display());
    Ok(())
}

/// Install a seed-derived key share and bootup record for this node.
fn cmd_gen_dkshare(
    config: AppConfig,
    seed: &str,
    nodes: Vec<String>,
    quorum: u16,
    index: Option<u16>,
    active: bool,
) -> anyhow::Result<()> {
    let index = match index {
        Some(i) => i,
        None => nodes
            .iter()
            .position(|n| *n == config.node.location)
            .map(|i| i as u16)
            .with_context(|| {
                format!(
                    "this node ({}) is not in the committee; pass --index",
                    config.node.location
                )
            })?,
    };
    let registry = open_registry(&config)?;
    let contract = DevContract::generate(seed, nodes, quorum)?;
    contract.install(&registry, index, active)?;

    println!("Contract address: {}", contract.address());
    println!("Color:            {}", contract.bootup.color);
    println!(
        "Committee:        {} of {}, this node is peer #{}",
        quorum,
        contract.bootup.size(),
        index
    );
    println!("Active:           {}", active);
    Ok(())
}

fn cmd_set_active(config: AppConfig, address: &str, active: bool) -> anyhow::Result<()> {
    let address = parse_address(address)?;
    let registry = open_registry(&config)?;
    registry.set_active(&address, active)?;
    println!(
        "Contract {} {}",
        address,
        if active { "activated" } else { "deactivated" }
    );
    Ok(())
}

fn cmd_contracts(config: AppConfig) -> anyhow::Result<()> {
    let registry = open_registry(&config)?;
    let records = registry.bootup_records()?;
    if records.is_empty() {
        println!("No contracts registered");
        return Ok(());
    }
    for bootup in records {
        let member = bootup
            .peer_index(&config.node.location)
            .map(|i| format!("peer #{}", i))
            .unwrap_or_else(|| "not a member".to_string());
        let share = if registry.get_dkshare(&bootup.address)?.is_some() {
            "key share"
        } else {
            "no key share"
        };
        println!(
            "{} {} nodes, {}, {}, {}",
            bootup.address,
            bootup.size(),
            member,
            share,
            if bootup.active { "active" } else { "inactive" }
        );
    }
    Ok(())
}

/// Info command handler.
fn cmd_info(config: AppConfig) -> anyhow::Result<()> {
    println!("rs-wasp {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Configuration:");
    println!("  Node: {}", config.node.name);
    println!("  Location: {}", config.node.location);
    println!("  Listen: {}", config.peering.listen_addr);
    println!("  Database: {}", config.database.path.display());
    println!();

    match open_registry(&config) {
        Ok(registry) => {
            let records = registry.bootup_records()?;
            let active = records.iter().filter(|b| b.active).count();
            println!("Contracts: {} registered, {} active", records.len(), active);
        }
        Err(e) => {
            tracing::debug!(error = %e, "Could not open registry");
            println!("Note: {}", e);
        }
    }

    Ok(())
}

/// Print sample configuration.
fn cmd_sample_config() -> anyhow::Result<()> {
    println!("{}", AppConfig::sample_config());
    Ok(())
}
