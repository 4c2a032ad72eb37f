use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use syncrelay::config;
use syncrelay::db;
use syncrelay::notify::{HttpNotificationSender, TemplateCatalog};
use syncrelay::webhook::workflow::now_ms;
use syncrelay::webhook::{HttpWebhookSender, WebhookEngine};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Deliver all pending webhook jobs and exit when none remain"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Exit as soon as only jobs waiting for a retry remain
    #[arg(long)]
    skip_waiting: bool,
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
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let engine = WebhookEngine::new(
        pool.clone(),
        Arc::new(HttpWebhookSender::new(&cfg.webhooks)?),
        Arc::new(HttpNotificationSender::new(
            &cfg.notifications,
            Duration::from_millis(cfg.webhooks.request_timeout_ms),
        )?),
        Arc::new(TemplateCatalog::builtin()),
        cfg.webhooks.default_retry_policy,
    )
    .with_lease(Duration::from_millis(cfg.webhooks.lease_ms))
    .with_max_in_flight(cfg.webhooks.max_in_flight);

    let remaining = db::count_pending_webhook_jobs(&pool).await?;
    info!(remaining, "starting webhook drain");
    if remaining == 0 {
        info!("no pending webhook jobs, exiting");
        return Ok(());
    }

    let mut attempts = 0u64;
    loop {
        match engine.process_next(now_ms()).await {
            Ok(true) => {
                attempts += 1;
                if attempts % 10 == 0 {
                    let remaining = db::count_pending_webhook_jobs(&pool).await?;
                    info!(attempts, remaining, "drain progress");
                }
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                error!(?err, "webhook attempt failed to persist");
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }
        }

        let Some(next_due) = db::next_webhook_due_at(&pool).await? else {
            info!(attempts, "all webhook jobs finished");
            break;
        };
        let remaining = db::count_pending_webhook_jobs(&pool).await?;
        if args.skip_waiting {
            warn!(remaining, "--skip-waiting specified, exiting with jobs in backoff");
            break;
        }
        let wait = Duration::from_millis(next_due.saturating_sub(now_ms()).max(0) as u64);
        info!(remaining, ?wait, "all remaining jobs are waiting for a retry");
        tokio::time::sleep(wait.max(Duration::from_millis(cfg.app.poll_interval_ms))).await;
    }

    Ok(())
}
