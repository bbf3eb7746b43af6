use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::Context;

#[derive(Parser)]
#[command(name = "snaplicator")]
#[command(about = "Disposable PostgreSQL clones from copy-on-write snapshots", long_about = None)]
struct Cli {
    /// Path to config.json (defaults to the user config directory)
    #[arg(long, global = true, env = "SNAPLICATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Print Prometheus metrics collected during the command
    #[arg(long, global = true)]
    emit_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage snapshots of the main volume
    #[command(subcommand)]
    Snapshot(SnapshotCommands),

    /// Create, refresh and delete clones
    #[command(subcommand)]
    Clone(CloneCommands),

    /// Inspect the main replica's subscriptions
    #[command(subcommand)]
    Replication(ReplicationCommands),
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// List snapshots, oldest first
    List {
        /// Include a disk usage estimate
        #[arg(long)]
        usage: bool,
    },

    /// Snapshot the main volume
    Create {
        /// Free-text description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Delete a snapshot
    Delete {
        /// Snapshot name under the root data directory
        name: String,
    },
}

#[derive(Subcommand)]
enum CloneCommands {
    /// Create a clone and start its container
    #[command(group(ArgGroup::new("source").required(true)))]
    Create {
        /// Snapshot to clone
        #[arg(long, group = "source")]
        from_snapshot: Option<String>,

        /// Clone the main volume directly
        #[arg(long, group = "source")]
        from_main: bool,

        /// Free-text description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Replace a clone's data with a fresh copy of main, keeping name and port
    Refresh {
        /// Clone container name
        container: String,

        /// Description (defaults to the clone's current one)
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Delete a clone's containers and volume
    Delete {
        /// Container name or clone volume name
        name: String,
    },

    /// List clone containers
    List,
}

#[derive(Subcommand)]
enum ReplicationCommands {
    /// Network and apply lag across subscriptions
    Lag,

    /// Initial table copy progress
    Progress,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    snaplicator_core::init_observability(&cli.log_level)?;
    let metrics = if cli.emit_metrics {
        Some(snaplicator_core::install_prometheus_recorder()?)
    } else {
        None
    };

    let ctx = Context::load(cli.config.as_deref(), cli.json)?;

    match cli.command {
        Commands::Snapshot(cmd) => match cmd {
            SnapshotCommands::List { usage } => commands::snapshot::list(&ctx, usage).await?,
            SnapshotCommands::Create { description } => {
                commands::snapshot::create(&ctx, description).await?
            }
            SnapshotCommands::Delete { name } => commands::snapshot::delete(&ctx, &name).await?,
        },

        Commands::Clone(cmd) => match cmd {
            CloneCommands::Create { from_snapshot, from_main: _, description } => {
                commands::clone::create(&ctx, from_snapshot.as_deref(), description).await?
            }
            CloneCommands::Refresh { container, description } => {
                commands::clone::refresh(&ctx, &container, description).await?
            }
            CloneCommands::Delete { name } => commands::clone::delete(&ctx, &name).await?,
            CloneCommands::List => commands::clone::list(&ctx).await?,
        },

        Commands::Replication(cmd) => match cmd {
            ReplicationCommands::Lag => commands::replication::lag(&ctx).await?,
            ReplicationCommands::Progress => commands::replication::progress(&ctx).await?,
        },
    }

    if let Some(handle) = metrics {
        eprintln!("{}", handle.render());
    }

    Ok(())
}
