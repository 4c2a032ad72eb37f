//! Interaction events: one message, call or note between participants.
//!
//! The parent is looked up by issue first, then by session. Sender and
//! receivers resolve through the participant priority order; a participant
//! lookup that errors is logged and treated as unresolved.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use super::{EntitySync, ItemContext, Prepared};
use crate::error::BackendError;
use crate::model::{
    EntityKind, InteractionEventInput, InteractionParticipant, ReferenceKind, ResolvedEntity,
    SyncMeta,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct InteractionEventSync;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedParticipant {
    #[serde(flatten)]
    pub entity: ResolvedEntity,
    pub relation_type: String,
}

#[derive(Debug, Default)]
pub struct InteractionEventRefs {
    pub issue_id: Option<String>,
    pub session_id: Option<String>,
    pub sender: Option<ResolvedParticipant>,
    pub receivers: Vec<ResolvedParticipant>,
}

impl InteractionEventRefs {
    fn has_contact(&self) -> bool {
        self.sender
            .iter()
            .chain(self.receivers.iter())
            .any(|p| p.entity.kind == ReferenceKind::Contact)
    }
}

async fn resolve_one(
    cx: &ItemContext<'_>,
    p: &InteractionParticipant,
) -> Option<ResolvedParticipant> {
    match cx
        .finder
        .resolve_participant(cx.tenant, cx.external_system, &p.participant)
        .await
    {
        Ok(found) => found.map(|entity| ResolvedParticipant {
            entity,
            relation_type: p.relation_type.clone(),
        }),
        Err(err) => {
            warn!(tenant = cx.tenant, %err, "participant lookup failed; ignoring participant");
            None
        }
    }
}

#[async_trait]
impl EntitySync for InteractionEventSync {
    type Input = InteractionEventInput;
    type Refs = InteractionEventRefs;

    fn kind(&self) -> EntityKind {
        EntityKind::InteractionEvent
    }

    fn meta<'a>(&self, input: &'a InteractionEventInput) -> &'a SyncMeta {
        &input.meta
    }

    fn normalize(&self, input: &mut InteractionEventInput, now: DateTime<Utc>) {
        input.normalize(now);
    }

    fn precheck(&self, input: &InteractionEventInput) -> Option<String> {
        if input.meta.id.is_none() && !input.meta.external.has_external_id() {
            return Some("missing external id".into());
        }
        None
    }

    async fn resolve_references(
        &self,
        cx: &ItemContext<'_>,
        input: &InteractionEventInput,
    ) -> Result<Prepared<InteractionEventRefs>, BackendError> {
        let mut refs = InteractionEventRefs::default();
        if let Some(issue) = &input.belongs_to.issue {
            refs.issue_id = cx.finder.issue(cx.tenant, cx.external_system, issue).await?;
        }
        if refs.issue_id.is_none() {
            if let Some(session) = &input.belongs_to.session {
                refs.session_id = cx
                    .finder
                    .interaction_session(cx.tenant, cx.external_system, session)
                    .await?;
            }
        }
        if input.parent_required && refs.issue_id.is_none() && refs.session_id.is_none() {
            return Ok(Prepared::Skip("parent not found".into()));
        }

        if let Some(sender) = &input.sent_by {
            refs.sender = resolve_one(cx, sender).await;
        }
        for receiver in &input.sent_to {
            let Some(found) = resolve_one(cx, receiver).await else {
                continue;
            };
            if !refs.receivers.iter().any(|r| r.entity.id == found.entity.id) {
                refs.receivers.push(found);
            }
        }
        if input.contact_required && !refs.has_contact() {
            return Ok(Prepared::Skip("contact not found".into()));
        }
        Ok(Prepared::Ready(refs))
    }

    fn attributes(
        &self,
        input: &InteractionEventInput,
        refs: &InteractionEventRefs,
    ) -> serde_json::Value {
        json!({
            "content": input.content,
            "content_type": input.content_type,
            "channel": input.channel,
            "channel_data": input.channel_data,
            "identifier": input.identifier,
            "event_type": input.event_type,
            "issue_id": refs.issue_id,
            "session_id": refs.session_id,
            "sent_by": refs.sender,
            "sent_to": refs.receivers,
            "created_at": input.meta.created_at,
            "updated_at": input.meta.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryGraph;
    use crate::finder::Finder;
    use crate::model::{
        BelongsTo, ReferencedContact, ReferencedInteractionSession, ReferencedIssue,
        ReferencedParticipant, ReferencedUser,
    };
    use std::sync::Arc;

    async fn finder() -> Finder {
        let g = InMemoryGraph::new();
        g.add_tenant("t1").await;
        g.seed("t1", EntityKind::User, "u1", Some(("zendesk", "zu-1")), &[])
            .await;
        g.seed("t1", EntityKind::Contact, "c1", Some(("zendesk", "zc-1")), &[])
            .await;
        g.seed("t1", EntityKind::Issue, "i1", Some(("zendesk", "zi-1")), &[])
            .await;
        g.seed(
            "t1",
            EntityKind::InteractionSession,
            "s1",
            Some(("zendesk", "zs-1")),
            &[],
        )
        .await;
        Finder::new(Arc::new(g))
    }

    fn contact(external_id: &str, relation: &str) -> InteractionParticipant {
        InteractionParticipant::new(
            ReferencedParticipant::contact(ReferencedContact {
                external_id: Some(external_id.into()),
                ..Default::default()
            }),
            relation,
        )
    }

    fn user(external_id: &str) -> InteractionParticipant {
        InteractionParticipant::new(
            ReferencedParticipant::user(ReferencedUser::by_external_id(external_id)),
            "",
        )
    }

    async fn resolve(input: &InteractionEventInput) -> Prepared<InteractionEventRefs> {
        let finder = finder().await;
        let cx = ItemContext {
            tenant: "t1",
            external_system: "zendesk",
            finder: &finder,
        };
        InteractionEventSync
            .resolve_references(&cx, input)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn issue_parent_wins_over_session() {
        let input = InteractionEventInput {
            belongs_to: BelongsTo {
                issue: Some(ReferencedIssue::by_external_id("zi-1")),
                session: Some(ReferencedInteractionSession::by_external_id("zs-1")),
            },
            ..Default::default()
        };
        let Prepared::Ready(refs) = resolve(&input).await else {
            panic!("expected ready");
        };
        assert_eq!(refs.issue_id.as_deref(), Some("i1"));
        assert_eq!(refs.session_id, None);
    }

    #[tokio::test]
    async fn unresolved_issue_falls_back_to_session() {
        let input = InteractionEventInput {
            belongs_to: BelongsTo {
                issue: Some(ReferencedIssue::by_external_id("gone")),
                session: Some(ReferencedInteractionSession::by_external_id("zs-1")),
            },
            parent_required: true,
            ..Default::default()
        };
        let Prepared::Ready(refs) = resolve(&input).await else {
            panic!("expected ready");
        };
        assert_eq!(refs.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn required_parent_missing_skips() {
        let input = InteractionEventInput {
            belongs_to: BelongsTo {
                issue: Some(ReferencedIssue::by_external_id("gone")),
                session: None,
            },
            parent_required: true,
            ..Default::default()
        };
        assert!(matches!(resolve(&input).await, Prepared::Skip(r) if r == "parent not found"));
    }

    #[tokio::test]
    async fn receivers_are_deduplicated_and_keep_relation_type() {
        let input = InteractionEventInput {
            sent_by: Some(user("zu-1")),
            sent_to: vec![contact("zc-1", "TO"), contact("zc-1", "CC"), contact("nobody", "BCC")],
            contact_required: true,
            ..Default::default()
        };
        let Prepared::Ready(refs) = resolve(&input).await else {
            panic!("expected ready");
        };
        assert_eq!(refs.sender.as_ref().map(|s| s.entity.kind), Some(ReferenceKind::User));
        assert_eq!(refs.receivers.len(), 1);
        assert_eq!(refs.receivers[0].entity.id, "c1");
        assert_eq!(refs.receivers[0].relation_type, "TO");
    }

    #[tokio::test]
    async fn required_contact_missing_skips() {
        let input = InteractionEventInput {
            sent_by: Some(user("zu-1")),
            sent_to: vec![contact("nobody", "TO")],
            contact_required: true,
            ..Default::default()
        };
        assert!(matches!(resolve(&input).await, Prepared::Skip(r) if r == "contact not found"));
    }

    #[test]
    fn attributes_carry_parent_and_participants() {
        let refs = InteractionEventRefs {
            session_id: Some("s1".into()),
            sender: Some(ResolvedParticipant {
                entity: ResolvedEntity {
                    id: "c1".into(),
                    kind: ReferenceKind::Contact,
                },
                relation_type: String::new(),
            }),
            ..Default::default()
        };
        let attrs = InteractionEventSync.attributes(&InteractionEventInput::default(), &refs);
        assert_eq!(attrs["session_id"], "s1");
        assert_eq!(attrs["sent_by"]["id"], "c1");
        assert_eq!(attrs["sent_by"]["kind"], "contact");
        assert_eq!(attrs["sent_to"], json!([]));
    }
}
