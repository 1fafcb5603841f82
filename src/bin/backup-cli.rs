use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use marketplace_ops::backup::{fetch_backup, list_backups, prune, BackupError, BackupOrchestrator, StorageRegistry};
use marketplace_ops::config::{load_config_or_default, AppConfig};
use marketplace_ops::observability::logging;

#[derive(Parser)]
#[command(name = "backup-cli")]
#[command(about = "Database backups for the marketplace", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump, optionally compress, upload, and prune
    Run {
        /// Named storage target from [backup.storage]
        #[arg(short, long, default_value = "local")]
        storage: String,
        /// Gzip the dump before upload
        #[arg(long)]
        compress: bool,
        /// Delete backups older than this many days
        #[arg(long)]
        retention_days: Option<u32>,
    },
    /// Apply the retention policy without taking a backup
    Prune {
        #[arg(short, long, default_value = "local")]
        storage: String,
        #[arg(long)]
        retention_days: Option<u32>,
    },
    /// List stored backups, newest first
    List {
        #[arg(short, long, default_value = "local")]
        storage: String,
    },
    /// Download one backup
    Fetch {
        #[arg(short, long, default_value = "local")]
        storage: String,
        /// File name, with or without the backups/ prefix
        filename: String,
        /// Destination path; defaults to the file name in the current directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_config_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error kind=CONFIG: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init_logging(&config.observability);

    match execute(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error kind={} stage={}: {e}", e.kind(), e.stage());
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands, config: &AppConfig) -> Result<(), BackupError> {
    let registry = StorageRegistry::from_config(&config.backup);
    let default_retention = config.backup.default_retention_days;

    match command {
        Commands::Run {
            storage,
            compress,
            retention_days,
        } => {
            let target = registry.get_durable(&storage)?;
            let orchestrator = BackupOrchestrator::from_config(config);
            let summary = orchestrator
                .run(target.as_ref(), compress, retention_days.unwrap_or(default_retention))
                .await?;
            println!("{summary}");
        }
        Commands::Prune {
            storage,
            retention_days,
        } => {
            let target = registry.get_durable(&storage)?;
            let pruned = prune(
                target.as_ref(),
                retention_days.unwrap_or(default_retention),
                chrono::Utc::now(),
            )
            .await?;
            println!("Pruned {pruned} old backup(s)");
        }
        Commands::List { storage } => {
            let target = registry.get_durable(&storage)?;
            for object in list_backups(target.as_ref()).await? {
                println!(
                    "{}\t{}\t{}",
                    object.last_modified.format("%Y-%m-%d %H:%M:%S"),
                    object.size,
                    object.path
                );
            }
        }
        Commands::Fetch {
            storage,
            filename,
            output,
        } => {
            let target = registry.get_durable(&storage)?;
            let dest = output.unwrap_or_else(|| {
                PathBuf::from(filename.rsplit('/').next().unwrap_or(filename.as_str()))
            });
            let bytes = fetch_backup(target.as_ref(), &filename, &dest).await?;
            println!("Fetched {bytes} bytes to {}", dest.display());
        }
    }
    Ok(())
}
