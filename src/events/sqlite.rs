use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use super::consumer::{EventStore, PersistentSubscription, SubscriptionMessage};
use crate::db::{self, Pool};
use crate::model::DomainEvent;

/// Event log and per-group delivery state kept in SQLite.
#[derive(Clone)]
pub struct SqliteEventStore {
    pool: Pool,
    poll_interval: Duration,
}

impl SqliteEventStore {
    pub fn new(pool: Pool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn subscribe(
        &self,
        group: &str,
        worker_id: usize,
    ) -> anyhow::Result<Box<dyn PersistentSubscription>> {
        Ok(Box::new(SqliteSubscription {
            pool: self.pool.clone(),
            group: group.to_string(),
            worker_id,
            poll_interval: self.poll_interval,
        }))
    }

    /// Claims still in flight belong to workers of a previous run.
    async fn prepare_group(&self, group: &str) -> anyhow::Result<()> {
        let released = db::release_inflight_events(&self.pool, group).await?;
        if released > 0 {
            info!(group, released, "released in-flight events for redelivery");
        }
        Ok(())
    }
}

struct SqliteSubscription {
    pool: Pool,
    group: String,
    worker_id: usize,
    poll_interval: Duration,
}

#[async_trait]
impl PersistentSubscription for SqliteSubscription {
    async fn next(&mut self) -> SubscriptionMessage {
        loop {
            match db::claim_next_event(&self.pool, &self.group, self.worker_id).await {
                Ok(Some(event)) => return SubscriptionMessage::EventAppeared(event),
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(err) => return SubscriptionMessage::Dropped(format!("{err:#}")),
            }
        }
    }

    async fn ack(&mut self, event: &DomainEvent) -> anyhow::Result<()> {
        db::ack_event(&self.pool, &self.group, event.position).await
    }

    async fn park(&mut self, event: &DomainEvent, reason: &str) -> anyhow::Result<()> {
        db::park_event(&self.pool, &self.group, event.position, reason).await
    }
}
