//! Event subscription consumers and their handlers.
pub mod consumer;
pub mod handlers;
pub mod sqlite;

pub use consumer::{
    ConsumerGroup, Disposition, EventHandler, EventStore, HandlerRegistry,
    PersistentSubscription, SubscriptionMessage,
};
pub use handlers::{DirectoryProjection, InvoiceWebhookHandler, OwnerUpdatedHandler};
pub use sqlite::SqliteEventStore;

use std::sync::Arc;

use crate::db::Pool;
use crate::model::event::{
    INVOICE_FINALIZED, INVOICE_PAID, ORGANIZATION_OWNER_UPDATED, ORGANIZATION_UPSERTED,
    USER_UPSERTED,
};
use crate::notify::{ContentProvider, NotificationSender};
use crate::webhook::WebhookEngine;

/// Every handler the daemon knows about, keyed by event type.
pub fn default_registry(
    pool: &Pool,
    engine: &WebhookEngine,
    notifier: Arc<dyn NotificationSender>,
    templates: Arc<dyn ContentProvider>,
    app_url: &str,
) -> HandlerRegistry {
    let directory: Arc<dyn EventHandler> = Arc::new(DirectoryProjection::new(pool.clone()));
    let invoices: Arc<dyn EventHandler> =
        Arc::new(InvoiceWebhookHandler::new(pool.clone(), engine.clone()));
    HandlerRegistry::new()
        .register(
            ORGANIZATION_OWNER_UPDATED,
            Arc::new(OwnerUpdatedHandler::new(
                pool.clone(),
                notifier,
                templates,
                app_url,
            )),
        )
        .register(USER_UPSERTED, directory.clone())
        .register(ORGANIZATION_UPSERTED, directory)
        .register(INVOICE_FINALIZED, invoices.clone())
        .register(INVOICE_PAID, invoices)
}
