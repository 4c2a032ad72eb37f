use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use syncrelay::config;
use syncrelay::db;

#[derive(Debug, Parser)]
#[command(author, version, about = "Inspect and replay parked events of a consumer group")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Consumer group name
    #[arg(long)]
    group: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print parked events
    List,
    /// Put parked events back into the group's stream
    Requeue {
        /// Only this event position
        #[arg(long)]
        position: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    if !cfg.subscriptions.iter().any(|s| s.group_name == args.group) {
        anyhow::bail!("unknown consumer group {}", args.group);
    }

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::List => {
            let parked = db::list_parked_events(&pool, &args.group).await?;
            if parked.is_empty() {
                println!("no parked events in {}", args.group);
            }
            for event in parked {
                println!(
                    "{}\t{}\t{}\t{}",
                    event.position, event.event_type, event.aggregate_id, event.reason
                );
            }
        }
        Command::Requeue { position } => {
            let requeued = db::requeue_parked_events(&pool, &args.group, position).await?;
            info!(group = %args.group, requeued, "parked events re-queued");
        }
    }
    Ok(())
}
