//! Match-or-create: decide which internal id a payload maps to.
//!
//! Lookup order is external-id link, explicitly supplied internal id, then
//! natural keys. When nothing matches, the id is minted here, before the
//! create command is sent. Callers serialize `resolve` + the command behind
//! one lock per orchestrator; across processes only the backend's uniqueness
//! constraints protect against duplicates.
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{NaturalKey, ReadModel};
use crate::error::BackendError;
use crate::model::{EntityKind, ExternalReference};

#[derive(Debug, Clone, Copy)]
pub struct MatchRequest<'a> {
    pub tenant: &'a str,
    pub kind: EntityKind,
    pub external: &'a ExternalReference,
    pub explicit_id: Option<&'a str>,
    pub natural_keys: &'a [NaturalKey],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Existing(String),
    New(String),
}

impl Resolution {
    pub fn id(&self) -> &str {
        match self {
            Resolution::Existing(id) | Resolution::New(id) => id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Resolution::New(_))
    }
}

#[derive(Clone)]
pub struct MatchOrCreate {
    reads: Arc<dyn ReadModel>,
}

impl MatchOrCreate {
    pub fn new(reads: Arc<dyn ReadModel>) -> Self {
        Self { reads }
    }

    pub async fn resolve(&self, req: MatchRequest<'_>) -> Result<Resolution, BackendError> {
        let system = req.external.external_system_id.as_str();

        let mut external_keys = Vec::new();
        if req.external.has_external_id() {
            external_keys.push(NaturalKey::ExternalId(req.external.external_id.clone()));
        }
        if let Some(second) = &req.external.external_id_second {
            external_keys.push(NaturalKey::ExternalIdSecond(second.clone()));
        }
        if !system.is_empty() && !external_keys.is_empty() {
            if let Some(id) = self
                .reads
                .find_matching(req.tenant, req.kind, system, &external_keys)
                .await?
            {
                debug!(tenant = req.tenant, kind = %req.kind, %id, "matched by external id");
                return Ok(Resolution::Existing(id));
            }
        }

        if let Some(id) = req.explicit_id {
            if let Some(record) = self.reads.get_by_id(req.tenant, req.kind, id).await? {
                debug!(tenant = req.tenant, kind = %req.kind, id = %record.id, "matched by id");
                return Ok(Resolution::Existing(record.id));
            }
        }

        if !req.natural_keys.is_empty() {
            if let Some(id) = self
                .reads
                .find_matching(req.tenant, req.kind, system, req.natural_keys)
                .await?
            {
                debug!(tenant = req.tenant, kind = %req.kind, %id, "matched by natural key");
                return Ok(Resolution::Existing(id));
            }
        }

        // An explicit id that is not visible yet is still honored so that
        // replays of the same payload address the same entity.
        let id = req
            .explicit_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Ok(Resolution::New(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryGraph;

    async fn resolver() -> (InMemoryGraph, MatchOrCreate) {
        let g = InMemoryGraph::new();
        g.add_tenant("t1").await;
        g.seed(
            "t1",
            EntityKind::Contact,
            "c-ext",
            Some(("hubspot", "h-1")),
            &[],
        )
        .await;
        g.seed(
            "t1",
            EntityKind::Contact,
            "c-mail",
            None,
            &[NaturalKey::Email("ada@example.com".into())],
        )
        .await;
        let r = MatchOrCreate::new(Arc::new(g.clone()));
        (g, r)
    }

    #[tokio::test]
    async fn external_id_beats_natural_key() {
        let (_g, r) = resolver().await;
        let ext = ExternalReference::new("hubspot", "h-1");
        let keys = [NaturalKey::Email("ada@example.com".into())];
        let res = r
            .resolve(MatchRequest {
                tenant: "t1",
                kind: EntityKind::Contact,
                external: &ext,
                explicit_id: None,
                natural_keys: &keys,
            })
            .await
            .unwrap();
        assert_eq!(res, Resolution::Existing("c-ext".into()));
    }

    #[tokio::test]
    async fn explicit_id_beats_natural_key() {
        let (_g, r) = resolver().await;
        let ext = ExternalReference::new("hubspot", "h-unknown");
        let keys = [NaturalKey::Email("ada@example.com".into())];
        let res = r
            .resolve(MatchRequest {
                tenant: "t1",
                kind: EntityKind::Contact,
                external: &ext,
                explicit_id: Some("c-ext"),
                natural_keys: &keys,
            })
            .await
            .unwrap();
        assert_eq!(res, Resolution::Existing("c-ext".into()));
    }

    #[tokio::test]
    async fn falls_back_to_natural_key_then_mints() {
        let (_g, r) = resolver().await;
        let ext = ExternalReference::new("hubspot", "h-2");
        let keys = [NaturalKey::Email("ada@example.com".into())];
        let res = r
            .resolve(MatchRequest {
                tenant: "t1",
                kind: EntityKind::Contact,
                external: &ext,
                explicit_id: None,
                natural_keys: &keys,
            })
            .await
            .unwrap();
        assert_eq!(res, Resolution::Existing("c-mail".into()));

        let keys = [NaturalKey::Email("grace@example.com".into())];
        let res = r
            .resolve(MatchRequest {
                tenant: "t1",
                kind: EntityKind::Contact,
                external: &ext,
                explicit_id: None,
                natural_keys: &keys,
            })
            .await
            .unwrap();
        assert!(res.is_new());
        assert!(Uuid::parse_str(res.id()).is_ok());
    }

    #[tokio::test]
    async fn unknown_explicit_id_is_kept_for_creation() {
        let (_g, r) = resolver().await;
        let ext = ExternalReference::default();
        let res = r
            .resolve(MatchRequest {
                tenant: "t1",
                kind: EntityKind::Contact,
                external: &ext,
                explicit_id: Some("c-new"),
                natural_keys: &[],
            })
            .await
            .unwrap();
        assert_eq!(res, Resolution::New("c-new".into()));
    }
}
