use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::{EntitySync, ItemContext, Prepared};
use crate::error::BackendError;
use crate::model::{CommentInput, EntityKind, SyncMeta};

#[derive(Debug, Clone, Copy, Default)]
pub struct CommentSync;

#[derive(Debug)]
pub struct CommentRefs {
    pub issue_id: String,
    pub author_id: Option<String>,
}

#[async_trait]
impl EntitySync for CommentSync {
    type Input = CommentInput;
    type Refs = CommentRefs;

    fn kind(&self) -> EntityKind {
        EntityKind::Comment
    }

    fn meta<'a>(&self, input: &'a CommentInput) -> &'a SyncMeta {
        &input.meta
    }

    fn normalize(&self, input: &mut CommentInput, now: DateTime<Utc>) {
        input.normalize(now);
    }

    async fn resolve_references(
        &self,
        cx: &ItemContext<'_>,
        input: &CommentInput,
    ) -> Result<Prepared<CommentRefs>, BackendError> {
        let Some(issue_id) = cx
            .finder
            .issue(cx.tenant, cx.external_system, &input.commented_issue)
            .await?
        else {
            return Ok(Prepared::Skip("commented issue not found".into()));
        };
        let author_id = match &input.author_user {
            Some(author) => cx.finder.user(cx.tenant, cx.external_system, author).await?,
            None => None,
        };
        Ok(Prepared::Ready(CommentRefs {
            issue_id,
            author_id,
        }))
    }

    fn attributes(&self, input: &CommentInput, refs: &CommentRefs) -> serde_json::Value {
        json!({
            "content": input.content,
            "content_type": input.content_type,
            "issue_id": refs.issue_id,
            "author_user_id": refs.author_id,
            "created_at": input.meta.created_at,
            "updated_at": input.meta.updated_at,
        })
    }
}
