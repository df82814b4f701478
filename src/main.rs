mod commands;

use std::path::PathBuf;

use berthd::config::{DaemonConfig, DEFAULT_ROOT, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_STORAGE_DRIVER};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "berthd")]
#[command(about = "Container daemon restore and reconciliation")]
struct Args {
    /// Daemon state root
    #[arg(long, global = true, default_value = DEFAULT_ROOT)]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List container records in the repository
    List,

    /// Restore containers from the repository without a task runtime
    Restore {
        /// Show what would be restarted and removed without writing checkpoints
        #[arg(long, short = 'n')]
        dry_run: bool,

        /// Keep containers running across daemon restarts
        #[arg(long)]
        live_restore: bool,

        /// Don't restart containers according to their restart policy
        #[arg(long)]
        no_auto_restart: bool,

        /// Storage driver containers must have been created with
        #[arg(long, default_value = DEFAULT_STORAGE_DRIVER)]
        storage_driver: String,

        /// Minimum seconds to wait for containers at shutdown (negative waits forever)
        #[arg(long, default_value_t = DEFAULT_SHUTDOWN_TIMEOUT, allow_negative_numbers = true)]
        shutdown_timeout: i64,

        /// Run the shutdown sequence after restoring
        #[arg(long)]
        shutdown: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let args = Args::parse();

    match args.command {
        Command::List => {
            commands::list(&args.root).await?;
        }
        Command::Restore {
            dry_run,
            live_restore,
            no_auto_restart,
            storage_driver,
            shutdown_timeout,
            shutdown,
        } => {
            let config = DaemonConfig {
                root: args.root,
                live_restore,
                auto_restart: !no_auto_restart,
                shutdown_timeout,
                storage_driver,
            };
            commands::restore(config, dry_run, shutdown).await?;
        }
    }

    Ok(())
}
