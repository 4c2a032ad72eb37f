//! Issues (tickets) and their participants.
//!
//! Reporter and submitter may be any participant kind. Followers and
//! collaborators are only linked when they resolve to users.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::{EntitySync, ItemContext, Prepared};
use crate::backend::Link;
use crate::error::BackendError;
use crate::model::{EntityKind, IssueInput, ReferenceKind, ResolvedEntity, SyncMeta};

#[derive(Debug, Clone, Copy, Default)]
pub struct IssueSync;

#[derive(Debug, Default)]
pub struct IssueRefs {
    pub reporter: Option<ResolvedEntity>,
    pub submitter: Option<ResolvedEntity>,
    pub follower_ids: Vec<String>,
    pub assignee_id: Option<String>,
}

#[async_trait]
impl EntitySync for IssueSync {
    type Input = IssueInput;
    type Refs = IssueRefs;

    fn kind(&self) -> EntityKind {
        EntityKind::Issue
    }

    fn meta<'a>(&self, input: &'a IssueInput) -> &'a SyncMeta {
        &input.meta
    }

    fn normalize(&self, input: &mut IssueInput, now: DateTime<Utc>) {
        input.normalize(now);
    }

    fn precheck(&self, input: &IssueInput) -> Option<String> {
        if input.meta.id.is_none() && !input.meta.external.has_external_id() {
            return Some("missing external id".into());
        }
        None
    }

    async fn resolve_references(
        &self,
        cx: &ItemContext<'_>,
        input: &IssueInput,
    ) -> Result<Prepared<IssueRefs>, BackendError> {
        let mut refs = IssueRefs::default();
        if let Some(reporter) = &input.reporter {
            refs.reporter = cx
                .finder
                .resolve_participant(cx.tenant, cx.external_system, reporter)
                .await?;
        }
        if input.organization_required
            && refs.reporter.as_ref().map(|r| r.kind) != Some(ReferenceKind::Organization)
        {
            return Ok(Prepared::Skip("reporter organization not found".into()));
        }
        if let Some(submitter) = &input.submitter {
            refs.submitter = cx
                .finder
                .resolve_participant(cx.tenant, cx.external_system, submitter)
                .await?;
        }
        for p in input.followers.iter().chain(input.collaborators.iter()) {
            let found = cx
                .finder
                .resolve_participant(cx.tenant, cx.external_system, p)
                .await?;
            if let Some(ResolvedEntity {
                id,
                kind: ReferenceKind::User,
            }) = found
            {
                if !refs.follower_ids.contains(&id) {
                    refs.follower_ids.push(id);
                }
            }
        }
        if let Some(assignee) = &input.assignee {
            refs.assignee_id = cx
                .finder
                .user(cx.tenant, cx.external_system, assignee)
                .await?;
        }
        Ok(Prepared::Ready(refs))
    }

    fn attributes(&self, input: &IssueInput, refs: &IssueRefs) -> serde_json::Value {
        json!({
            "subject": input.subject,
            "description": input.description,
            "status": input.status,
            "priority": input.priority,
            "reported_by": refs.reporter,
            "submitted_by": refs.submitter,
            "created_at": input.meta.created_at,
            "updated_at": input.meta.updated_at,
        })
    }

    fn links(&self, _input: &IssueInput, refs: &IssueRefs) -> Vec<Link> {
        let mut links: Vec<Link> = refs
            .follower_ids
            .iter()
            .map(|user_id| Link::Follower {
                user_id: user_id.clone(),
            })
            .collect();
        if let Some(user_id) = &refs.assignee_id {
            links.push(Link::Assignee {
                user_id: user_id.clone(),
            });
        }
        links
    }
}
