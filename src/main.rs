use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use syncrelay::config;
use syncrelay::db;
use syncrelay::error::SubscriptionError;
use syncrelay::events::{self, ConsumerGroup, EventStore, SqliteEventStore};
use syncrelay::notify::{ContentProvider, HttpNotificationSender, NotificationSender, TemplateCatalog};
use syncrelay::webhook::{HttpWebhookSender, WebhookEngine};

#[derive(Debug, Parser)]
#[command(author, version, about = "Event consumers and webhook delivery daemon")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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

    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    let notifier: Arc<dyn NotificationSender> = Arc::new(HttpNotificationSender::new(
        &cfg.notifications,
        Duration::from_millis(cfg.webhooks.request_timeout_ms),
    )?);
    let templates: Arc<dyn ContentProvider> = Arc::new(TemplateCatalog::builtin());
    let engine = WebhookEngine::new(
        pool.clone(),
        Arc::new(HttpWebhookSender::new(&cfg.webhooks)?),
        notifier.clone(),
        templates.clone(),
        cfg.webhooks.default_retry_policy,
    )
    .with_lease(Duration::from_millis(cfg.webhooks.lease_ms))
    .with_max_in_flight(cfg.webhooks.max_in_flight);

    let registry = events::default_registry(
        &pool,
        &engine,
        notifier,
        templates,
        &cfg.notifications.app_url,
    );
    let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(pool.clone(), poll_sleep));

    let cancel = CancellationToken::new();
    let mut tasks: JoinSet<Result<(), SubscriptionError>> = JoinSet::new();

    {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            engine.run(&cancel, poll_sleep).await;
            Ok(())
        });
    }
    for sub in &cfg.subscriptions {
        let handlers = Arc::new(registry.only(&sub.event_types));
        let group = ConsumerGroup::new(sub.clone(), store.clone(), handlers);
        let cancel = cancel.clone();
        tasks.spawn(async move { group.run(&cancel).await });
    }
    info!(groups = cfg.subscriptions.len(), "relay started");

    let mut failure = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                cancel.cancel();
                break;
            }
            joined = tasks.join_next() => {
                match joined {
                    None => break,
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(err))) => {
                        error!(%err, "consumer group failed; shutting down");
                        cancel.cancel();
                        failure = Some(anyhow::Error::from(err));
                        break;
                    }
                    Some(Err(err)) => {
                        error!(?err, "relay task crashed; shutting down");
                        cancel.cancel();
                        failure = Some(anyhow::Error::from(err));
                        break;
                    }
                }
            }
        }
    }
    while tasks.join_next().await.is_some() {}

    match failure {
        // Non-zero exit so the supervisor restarts us.
        Some(err) => Err(err),
        None => Ok(()),
    }
}
