use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::{EntitySync, ItemContext, Prepared};
use crate::error::BackendError;
use crate::model::{EntityKind, LogEntryInput, SyncMeta};

/// Activity log entries attached to an organization.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEntrySync;

#[derive(Debug, Default)]
pub struct LogEntryRefs {
    pub organization_id: Option<String>,
    pub author_id: Option<String>,
}

#[async_trait]
impl EntitySync for LogEntrySync {
    type Input = LogEntryInput;
    type Refs = LogEntryRefs;

    fn kind(&self) -> EntityKind {
        EntityKind::LogEntry
    }

    fn meta<'a>(&self, input: &'a LogEntryInput) -> &'a SyncMeta {
        &input.meta
    }

    fn normalize(&self, input: &mut LogEntryInput, now: DateTime<Utc>) {
        input.normalize(now);
    }

    async fn resolve_references(
        &self,
        cx: &ItemContext<'_>,
        input: &LogEntryInput,
    ) -> Result<Prepared<LogEntryRefs>, BackendError> {
        let organization_id = if input.logged_organization.is_empty() {
            None
        } else {
            cx.finder
                .organization(cx.tenant, cx.external_system, &input.logged_organization)
                .await?
        };
        if input.logged_entity_required && organization_id.is_none() {
            return Ok(Prepared::Skip("logged organization not found".into()));
        }
        let author_id = match &input.author_user {
            Some(author) => cx.finder.user(cx.tenant, cx.external_system, author).await?,
            None => None,
        };
        Ok(Prepared::Ready(LogEntryRefs {
            organization_id,
            author_id,
        }))
    }

    fn attributes(&self, input: &LogEntryInput, refs: &LogEntryRefs) -> serde_json::Value {
        json!({
            "content": input.content,
            "content_type": input.content_type,
            "started_at": input.started_at,
            "logged_organization_id": refs.organization_id,
            "author_user_id": refs.author_id,
            "created_at": input.meta.created_at,
            "updated_at": input.meta.updated_at,
        })
    }
}
