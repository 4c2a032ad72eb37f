use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::{EntitySync, ItemContext, Prepared};
use crate::error::BackendError;
use crate::model::{EntityKind, InteractionSessionInput, SyncMeta};

/// Sessions group interaction events, e.g. one per mail thread. They match
/// by external id only.
#[derive(Debug, Clone, Copy, Default)]
pub struct InteractionSessionSync;

#[async_trait]
impl EntitySync for InteractionSessionSync {
    type Input = InteractionSessionInput;
    type Refs = ();

    fn kind(&self) -> EntityKind {
        EntityKind::InteractionSession
    }

    fn meta<'a>(&self, input: &'a InteractionSessionInput) -> &'a SyncMeta {
        &input.meta
    }

    fn normalize(&self, input: &mut InteractionSessionInput, now: DateTime<Utc>) {
        input.normalize(now);
    }

    fn precheck(&self, input: &InteractionSessionInput) -> Option<String> {
        if input.meta.id.is_none() && !input.meta.external.has_external_id() {
            return Some("missing external id".into());
        }
        None
    }

    async fn resolve_references(
        &self,
        _cx: &ItemContext<'_>,
        _input: &InteractionSessionInput,
    ) -> Result<Prepared<()>, BackendError> {
        Ok(Prepared::Ready(()))
    }

    fn attributes(&self, input: &InteractionSessionInput, _refs: &()) -> serde_json::Value {
        json!({
            "name": input.name,
            "status": input.status,
            "type": input.session_type,
            "channel": input.channel,
            "identifier": input.identifier,
            "created_at": input.meta.created_at,
            "updated_at": input.meta.updated_at,
        })
    }
}
