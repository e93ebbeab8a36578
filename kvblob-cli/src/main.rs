//! kvblob CLI
//!
//! Command-line client for a local kvblob database.
//!
//! # Commands
//! - `put` - Store a file or standard input as a blob
//! - `get` - Read a blob to a file or standard output
//! - `list` - List blobs by name prefix
//! - `stat` - Show a blob's metadata record
//! - `config` - Show or initialize configuration
//!
//! # Configuration
//! Config file: ~/.kvblob/config.toml
//! Environment: `KVBLOB_DB`, `KVBLOB_NAMESPACE`, `KVBLOB_CHUNK_SIZE`,
//! `KVBLOB_TX_BYTES`, `KVBLOB_TX_TIME_MS`, `KVBLOB_MAX_RETRIES`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod symbols;

use commands::{get, list, put, stat, Store};
use kvblob_storage::RocksDbStore;
use kvblob_store::BlobStore;

#[derive(Parser)]
#[command(name = "kvblob")]
#[command(about = "Blob storage on a transactional key-value database")]
#[command(version)]
struct Cli {
    /// Database directory (overrides config file)
    #[arg(long, global = true, env = "KVBLOB_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file as a blob
    Put {
        /// Blob name
        name: String,

        /// File to store (reads standard input if omitted or "-")
        path: Option<String>,
    },

    /// Read a blob
    Get {
        /// Blob name
        name: String,

        /// Output file (writes standard output if omitted or "-")
        #[arg(short, long)]
        output: Option<String>,

        /// Skip content hash verification
        #[arg(long)]
        no_verify: bool,
    },

    /// List blobs
    #[command(alias = "ls")]
    List {
        /// Name prefix
        #[arg(default_value = "")]
        prefix: String,

        /// Long format with details
        #[arg(short, long)]
        long: bool,

        /// Human-readable sizes
        #[arg(short = 'H', long)]
        human_readable: bool,
    },

    /// Show blob metadata
    Stat {
        /// Blob name
        name: String,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Show config file path
    Path,

    /// Initialize config file with defaults
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration from ~/.kvblob/config.toml
    let cfg = config::load_config();
    let db = cli.db;
    let open = || open_store(&cfg, db.clone());

    match cli.command {
        Commands::Put { name, path } => {
            let config = put::PutConfig { name, path };
            put::run(&open()?, config).await?;
        }

        Commands::Get {
            name,
            output,
            no_verify,
        } => {
            let config = get::GetConfig {
                name,
                output,
                verify: !no_verify,
            };
            get::run(&open()?, config).await?;
        }

        Commands::List {
            prefix,
            long,
            human_readable,
        } => {
            let config = list::ListConfig {
                prefix,
                long_format: long,
                human_readable,
            };
            list::run(&open()?, config).await?;
        }

        Commands::Stat { name } => {
            stat::run(&open()?, name).await?;
        }

        Commands::Config { command } => {
            handle_config_command(command)?;
        }
    }

    Ok(())
}

/// Open the database and wrap it in a blob store
fn open_store(cfg: &config::KvBlobConfig, db: Option<PathBuf>) -> Result<Store> {
    let path = cfg.database_path(db)?;
    let substrate = RocksDbStore::open(cfg.storage_config(path.clone()))
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    let blobs = BlobStore::new(substrate, cfg.blobs.clone()).context("Invalid blob settings")?;
    Ok(Store::new(blobs))
}

fn handle_config_command(command: Option<ConfigCommands>) -> Result<()> {
    use console::style;

    match command {
        None | Some(ConfigCommands::Show) => {
            // Show current configuration
            let cfg = config::load_config();
            println!();
            println!("{}", style("kvblob Configuration").bold().underlined());
            println!();
            println!("{}", style("[storage]").cyan());
            match cfg.database_path(None) {
                Ok(path) => println!("  path = \"{}\"", path.display()),
                Err(e) => println!("  path = {} ({})", style("unavailable").red(), e),
            }
            println!("  cache_size_mb = {}", cfg.storage.cache_size_mb);
            println!("  compression = {}", cfg.storage.compression);
            println!();
            println!("{}", style("[blobs]").cyan());
            println!("  namespace = \"{}\"", cfg.blobs.namespace);
            println!("  chunk_max_size = {}", cfg.blobs.chunk_max_size);
            println!("  tx_byte_budget = {}", cfg.blobs.tx_byte_budget);
            println!("  tx_time_budget_ms = {}", cfg.blobs.tx_time_budget_ms);
            println!("  max_retries = {}", cfg.blobs.max_retries);
            println!("  verify_on_read = {}", cfg.blobs.verify_on_read);
            println!();

            // Show config file path
            if let Ok(path) = config::config_file_path() {
                println!("{} {}", style("Config file:").dim(), path.display());
                if !path.exists() {
                    println!(
                        "{} Run '{}' to create it",
                        style("(not created yet)").yellow(),
                        style("kvblob config init").green()
                    );
                }
            }
        }

        Some(ConfigCommands::Path) => {
            if let Ok(path) = config::config_file_path() {
                println!("{}", path.display());
            }
        }

        Some(ConfigCommands::Init { force }) => {
            let path = config::config_file_path()?;
            if path.exists() && !force {
                println!(
                    "{} Config file already exists at {}",
                    style(symbols::WARN).yellow(),
                    path.display()
                );
                println!("Use --force to overwrite");
                return Ok(());
            }

            config::save_config(&config::KvBlobConfig::default())?;
            println!(
                "{} Config file created at {}",
                style(symbols::CHECK).green(),
                path.display()
            );
        }
    }

    Ok(())
}
