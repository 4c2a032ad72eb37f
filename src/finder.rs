//! Resolution of reference pointers into concrete internal ids.
//!
//! Absence is a normal answer: every lookup returns `Ok(None)` when nothing
//! matches and only surfaces backend faults as errors.
use std::sync::Arc;
use tracing::debug;

use crate::backend::{NaturalKey, ReadModel};
use crate::error::BackendError;
use crate::model::reference::ReferencedAny;
use crate::model::{
    EntityKind, ReferenceKind, ReferencedContact, ReferencedEntity,
    ReferencedInteractionSession, ReferencedIssue, ReferencedJobRole, ReferencedOrganization,
    ReferencedParticipant, ReferencedUser, ResolvedEntity,
};

/// Kinds a generic participant may turn out to be, in lookup order.
const PARTICIPANT_KINDS: [(EntityKind, ReferenceKind); 3] = [
    (EntityKind::User, ReferenceKind::User),
    (EntityKind::Contact, ReferenceKind::Contact),
    (EntityKind::Organization, ReferenceKind::Organization),
];

#[derive(Clone)]
pub struct Finder {
    reads: Arc<dyn ReadModel>,
}

impl Finder {
    pub fn new(reads: Arc<dyn ReadModel>) -> Self {
        Self { reads }
    }

    /// First concrete pointer of `participant` that resolves, in priority
    /// order user, contact, organization, participant, job role.
    pub async fn resolve_participant(
        &self,
        tenant: &str,
        external_system: &str,
        participant: &ReferencedParticipant,
    ) -> Result<Option<ResolvedEntity>, BackendError> {
        for candidate in participant.candidates() {
            if let Some(found) = self.resolve(tenant, external_system, &candidate).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    pub async fn resolve(
        &self,
        tenant: &str,
        external_system: &str,
        reference: &ReferencedEntity,
    ) -> Result<Option<ResolvedEntity>, BackendError> {
        let found = match reference {
            ReferencedEntity::User(r) => self
                .user(tenant, external_system, r)
                .await?
                .map(|id| (id, ReferenceKind::User)),
            ReferencedEntity::Contact(r) => self
                .contact(tenant, external_system, r)
                .await?
                .map(|id| (id, ReferenceKind::Contact)),
            ReferencedEntity::Organization(r) => self
                .organization(tenant, external_system, r)
                .await?
                .map(|id| (id, ReferenceKind::Organization)),
            ReferencedEntity::Issue(r) => self
                .issue(tenant, external_system, r)
                .await?
                .map(|id| (id, ReferenceKind::Issue)),
            ReferencedEntity::InteractionSession(r) => self
                .interaction_session(tenant, external_system, r)
                .await?
                .map(|id| (id, ReferenceKind::InteractionSession)),
            ReferencedEntity::Participant(r) => self.any(tenant, external_system, r).await?,
            ReferencedEntity::JobRole(r) => self
                .job_role(tenant, external_system, r)
                .await?
                .map(|id| (id, ReferenceKind::JobRole)),
        };
        if found.is_none() {
            debug!(tenant, external_system, kind = ?reference.kind(), "reference not resolved");
        }
        Ok(found.map(|(id, kind)| ResolvedEntity { id, kind }))
    }

    /// By id, then external id, then secondary external id.
    pub async fn user(
        &self,
        tenant: &str,
        external_system: &str,
        r: &ReferencedUser,
    ) -> Result<Option<String>, BackendError> {
        if let Some(id) = self.by_id(tenant, EntityKind::User, r.id.as_deref()).await? {
            return Ok(Some(id));
        }
        let mut keys = Vec::new();
        if let Some(ext) = &r.external_id {
            keys.push(NaturalKey::ExternalId(ext.clone()));
        }
        if let Some(ext) = &r.external_id_second {
            keys.push(NaturalKey::ExternalIdSecond(ext.clone()));
        }
        self.matching(tenant, EntityKind::User, external_system, keys)
            .await
    }

    /// By id, then external id, then email.
    pub async fn contact(
        &self,
        tenant: &str,
        external_system: &str,
        r: &ReferencedContact,
    ) -> Result<Option<String>, BackendError> {
        if let Some(id) = self.by_id(tenant, EntityKind::Contact, r.id.as_deref()).await? {
            return Ok(Some(id));
        }
        let mut keys = Vec::new();
        if let Some(ext) = &r.external_id {
            keys.push(NaturalKey::ExternalId(ext.clone()));
        }
        if let Some(email) = &r.email {
            keys.push(NaturalKey::Email(email.clone()));
        }
        self.matching(tenant, EntityKind::Contact, external_system, keys)
            .await
    }

    /// By id, then external id, then domain.
    pub async fn organization(
        &self,
        tenant: &str,
        external_system: &str,
        r: &ReferencedOrganization,
    ) -> Result<Option<String>, BackendError> {
        if let Some(id) = self
            .by_id(tenant, EntityKind::Organization, r.id.as_deref())
            .await?
        {
            return Ok(Some(id));
        }
        let mut keys = Vec::new();
        if let Some(ext) = &r.external_id {
            keys.push(NaturalKey::ExternalId(ext.clone()));
        }
        if let Some(domain) = &r.domain {
            keys.push(NaturalKey::Domain(domain.clone()));
        }
        self.matching(tenant, EntityKind::Organization, external_system, keys)
            .await
    }

    pub async fn issue(
        &self,
        tenant: &str,
        external_system: &str,
        r: &ReferencedIssue,
    ) -> Result<Option<String>, BackendError> {
        if let Some(id) = self.by_id(tenant, EntityKind::Issue, r.id.as_deref()).await? {
            return Ok(Some(id));
        }
        let keys = r
            .external_id
            .iter()
            .map(|ext| NaturalKey::ExternalId(ext.clone()))
            .collect();
        self.matching(tenant, EntityKind::Issue, external_system, keys)
            .await
    }

    pub async fn interaction_session(
        &self,
        tenant: &str,
        external_system: &str,
        r: &ReferencedInteractionSession,
    ) -> Result<Option<String>, BackendError> {
        if let Some(id) = self
            .by_id(tenant, EntityKind::InteractionSession, r.id.as_deref())
            .await?
        {
            return Ok(Some(id));
        }
        let keys = r
            .external_id
            .iter()
            .map(|ext| NaturalKey::ExternalId(ext.clone()))
            .collect();
        self.matching(tenant, EntityKind::InteractionSession, external_system, keys)
            .await
    }

    async fn any(
        &self,
        tenant: &str,
        external_system: &str,
        r: &ReferencedAny,
    ) -> Result<Option<(String, ReferenceKind)>, BackendError> {
        if let Some(id) = r.id.as_deref() {
            for (kind, reference_kind) in PARTICIPANT_KINDS {
                if let Some(found) = self.by_id(tenant, kind, Some(id)).await? {
                    return Ok(Some((found, reference_kind)));
                }
            }
        }
        if let Some(ext) = &r.external_id {
            let keys = [NaturalKey::ExternalId(ext.clone())];
            for (kind, reference_kind) in PARTICIPANT_KINDS {
                if let Some(found) = self
                    .reads
                    .find_matching(tenant, kind, external_system, &keys)
                    .await?
                {
                    return Ok(Some((found, reference_kind)));
                }
            }
        }
        Ok(None)
    }

    async fn job_role(
        &self,
        tenant: &str,
        external_system: &str,
        r: &ReferencedJobRole,
    ) -> Result<Option<String>, BackendError> {
        let Some(contact_id) = self.contact(tenant, external_system, &r.contact).await? else {
            return Ok(None);
        };
        let Some(organization_id) = self
            .organization(tenant, external_system, &r.organization)
            .await?
        else {
            return Ok(None);
        };
        self.reads
            .find_job_role(tenant, &contact_id, &organization_id)
            .await
    }

    async fn by_id(
        &self,
        tenant: &str,
        kind: EntityKind,
        id: Option<&str>,
    ) -> Result<Option<String>, BackendError> {
        let Some(id) = id else {
            return Ok(None);
        };
        Ok(self
            .reads
            .get_by_id(tenant, kind, id)
            .await?
            .map(|record| record.id))
    }

    async fn matching(
        &self,
        tenant: &str,
        kind: EntityKind,
        external_system: &str,
        keys: Vec<NaturalKey>,
    ) -> Result<Option<String>, BackendError> {
        if keys.is_empty() {
            return Ok(None);
        }
        self.reads
            .find_matching(tenant, kind, external_system, &keys)
            .await
    }
}
