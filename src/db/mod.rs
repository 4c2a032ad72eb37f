//! Database module: row models and SQL repositories.
//!
//! - `model`: typed rows returned by repositories.
//! - `repo`: SQL-only functions that map rows into those types.
//!
//! The repository API is re-exported at `crate::db::*`.

use async_trait::async_trait;

use crate::backend::RunSummaryStore;
use crate::model::SyncRunSummary;

pub mod model;
pub mod repo;

pub use model::{
    DeliveryState, DirectoryOrganization, DirectoryUser, NewTenantWebhook, ParkedEvent,
    TenantWebhook, WebhookAttempt, WebhookJobRow,
};
pub use repo::*;

/// Run summaries persisted into the `sync_runs` table.
#[derive(Clone)]
pub struct SqliteRunSummaryStore {
    pool: Pool,
}

impl SqliteRunSummaryStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunSummaryStore for SqliteRunSummaryStore {
    async fn save(&self, summary: &SyncRunSummary) -> anyhow::Result<()> {
        insert_run_summary(&self.pool, summary).await?;
        Ok(())
    }
}
