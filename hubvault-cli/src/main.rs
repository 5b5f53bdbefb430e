use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hubvault_core::backup::ImportMode;
use hubvault_core::config::{LogFormat, LoggingConfig};
use hubvault_core::schema::health_hub;
use hubvault_core::HubvaultConfig;

mod commands;
mod error;

use commands::{Context, Outcome};
use error::CliError;

#[derive(Parser, Debug)]
#[command(name = "hubvault", version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Back up, validate and restore Health Hub data")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file, overrides the configured path
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export tables to a backup file
    Export {
        /// Comma-separated tables to export (default: all)
        #[arg(long, value_delimiter = ',')]
        tables: Option<Vec<String>>,

        /// Only export rows owned by this user
        #[arg(long)]
        user: Option<String>,

        /// Output file (default: generated from app name and time)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a backup file without touching the database
    Validate {
        file: PathBuf,
    },
    /// Restore a backup file into the database
    Import {
        file: PathBuf,

        /// Conflict policy: overwrite, skip or merge (default from config)
        #[arg(long)]
        mode: Option<ImportMode>,

        /// Comma-separated tables to import (default: all present)
        #[arg(long, value_delimiter = ',')]
        tables: Option<Vec<String>>,

        /// Validate and count without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Row counts per table
    Counts {
        /// Count only rows owned by this user
        #[arg(long)]
        user: Option<String>,
    },
    /// Database, schema and health summary
    Status,
}

fn init_logging(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let env_filter = if std::env::var_os("RUST_LOG").is_some() {
        env_filter
    } else {
        match logging.level.parse() {
            Ok(directive) => env_filter.add_directive(directive),
            Err(_) => env_filter,
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    let _ = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}

fn load_config(cli: &Cli) -> Result<HubvaultConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => HubvaultConfig::load_from_file(path)?,
        None => HubvaultConfig::default(),
    };
    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }
    Ok(config)
}

fn run(cli: Cli, config: HubvaultConfig) -> Result<Outcome, CliError> {
    let ctx = Context {
        config,
        registry: health_hub::registry()?,
    };
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Export {
            tables,
            user,
            output,
        } => commands::export(&ctx, tables, user, output, &mut out),
        Commands::Validate { file } => commands::validate(&ctx, &file, &mut out),
        Commands::Import {
            file,
            mode,
            tables,
            dry_run,
        } => commands::import(&ctx, &file, mode, tables, dry_run, &mut out),
        Commands::Counts { user } => commands::counts(&ctx, user.as_deref(), &mut out),
        Commands::Status => commands::status(&ctx, &mut out),
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("hubvault: {}", e);
            std::process::exit(Outcome::Failed.exit_code());
        }
    };
    init_logging(&config.logging);

    match run(cli, config) {
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            std::process::exit(Outcome::Failed.exit_code());
        }
    }
}
