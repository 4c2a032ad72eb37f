//! Competing-consumer groups over a durable event stream.
//!
//! A group runs `pool_size` workers against one subscription. Every event is
//! delivered to exactly one worker, routed by type to a handler, and then
//! acknowledged or parked. A dropped subscription stops the whole group.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Subscription;
use crate::error::SubscriptionError;
use crate::model::DomainEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionMessage {
    EventAppeared(DomainEvent),
    /// The transport gave up on this subscription.
    Dropped(String),
}

/// One worker's connection to a consumer group.
#[async_trait]
pub trait PersistentSubscription: Send {
    /// Waits until the next event is available.
    async fn next(&mut self) -> SubscriptionMessage;
    async fn ack(&mut self, event: &DomainEvent) -> anyhow::Result<()>;
    async fn park(&mut self, event: &DomainEvent, reason: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn subscribe(
        &self,
        group: &str,
        worker_id: usize,
    ) -> anyhow::Result<Box<dyn PersistentSubscription>>;

    /// Called once before the workers of `group` start.
    async fn prepare_group(&self, _group: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Routes event types to handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, event_type: &str, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(event_type.to_string(), handler);
        self
    }

    /// Restrict routing to `event_types`; an empty list keeps everything.
    pub fn only(&self, event_types: &[String]) -> Self {
        if event_types.is_empty() {
            return self.clone();
        }
        Self {
            handlers: self
                .handlers
                .iter()
                .filter(|(event_type, _)| event_types.contains(event_type))
                .map(|(event_type, handler)| (event_type.clone(), handler.clone()))
                .collect(),
        }
    }

    pub fn get(&self, event_type: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(event_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Park(String),
}

#[derive(Clone)]
pub struct ConsumerGroup {
    settings: Subscription,
    store: Arc<dyn EventStore>,
    handlers: Arc<HandlerRegistry>,
}

impl ConsumerGroup {
    pub fn new(
        settings: Subscription,
        store: Arc<dyn EventStore>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            settings,
            store,
            handlers,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.group_name
    }

    /// Run the group until `cancel` fires (`Ok`) or one worker fails, in
    /// which case the others are cancelled and the first error is returned.
    #[instrument(skip_all, fields(group = %self.settings.group_name))]
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), SubscriptionError> {
        self.store.prepare_group(&self.settings.group_name).await?;
        let group_cancel = cancel.child_token();
        let mut workers = JoinSet::new();
        for worker_id in 0..self.settings.pool_size.max(1) {
            let group = self.clone();
            let token = group_cancel.clone();
            workers.spawn(async move { group.worker(worker_id, token).await });
        }
        info!(pool_size = self.settings.pool_size, "consumer group started");

        let mut first_err: Option<SubscriptionError> = None;
        while let Some(joined) = workers.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(err) => Err(SubscriptionError::Dropped(format!("worker crashed: {err}"))),
            };
            if let Err(err) = result {
                error!(%err, "consumer worker stopped; stopping group");
                group_cancel.cancel();
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => {
                info!("consumer group stopped");
                Ok(())
            }
        }
    }

    async fn worker(
        &self,
        worker_id: usize,
        cancel: CancellationToken,
    ) -> Result<(), SubscriptionError> {
        let mut sub = self
            .store
            .subscribe(&self.settings.group_name, worker_id)
            .await?;
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                m = sub.next() => m,
            };
            let event = match message {
                SubscriptionMessage::EventAppeared(event) => event,
                SubscriptionMessage::Dropped(reason) => {
                    return Err(SubscriptionError::Dropped(reason));
                }
            };
            match self.dispatch(&event).await {
                Disposition::Ack => sub.ack(&event).await?,
                Disposition::Park(reason) => {
                    warn!(
                        worker_id,
                        position = event.position,
                        event_type = %event.event_type,
                        %reason,
                        "event parked"
                    );
                    sub.park(&event, &reason).await?;
                }
            }
        }
    }

    /// Decide what happens to one event. Never fails: handler errors and
    /// timeouts park the event.
    pub async fn dispatch(&self, event: &DomainEvent) -> Disposition {
        if event.is_system() || self.settings.ignore_events {
            debug!(position = event.position, "event acknowledged without dispatch");
            return Disposition::Ack;
        }
        let Some(handler) = self.handlers.get(&event.event_type) else {
            debug!(event_type = %event.event_type, "no handler registered");
            return Disposition::Ack;
        };
        let timeout = Duration::from_secs(self.settings.handler_timeout_secs);
        match tokio::time::timeout(timeout, handler.handle(event)).await {
            Ok(Ok(())) => Disposition::Ack,
            Ok(Err(err)) => Disposition::Park(format!("{err:#}")),
            Err(_) => Disposition::Park(format!("handler timed out after {timeout:?}")),
        }
    }
}
