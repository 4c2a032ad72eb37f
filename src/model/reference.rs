//! Pointers from one synced payload to other entities.
//!
//! A reference names its target by internal id, by external id, or by a
//! natural key. When several are present they are tried in that order and
//! the first hit wins.
use serde::{Deserialize, Serialize};

use super::non_blank;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    User,
    Contact,
    Organization,
    Participant,
    JobRole,
    Issue,
    InteractionSession,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferencedUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub external_id_second: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferencedContact {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferencedOrganization {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferencedIssue {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferencedInteractionSession {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
}

/// Participant of unknown kind, addressed by id or external id only.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferencedAny {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
}

/// A contact acting for an organization. Both sides must resolve.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferencedJobRole {
    pub contact: ReferencedContact,
    pub organization: ReferencedOrganization,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferencedEntity {
    User(ReferencedUser),
    Contact(ReferencedContact),
    Organization(ReferencedOrganization),
    Participant(ReferencedAny),
    JobRole(ReferencedJobRole),
    Issue(ReferencedIssue),
    InteractionSession(ReferencedInteractionSession),
}

impl ReferencedEntity {
    pub fn kind(&self) -> ReferenceKind {
        match self {
            ReferencedEntity::User(_) => ReferenceKind::User,
            ReferencedEntity::Contact(_) => ReferenceKind::Contact,
            ReferencedEntity::Organization(_) => ReferenceKind::Organization,
            ReferencedEntity::Participant(_) => ReferenceKind::Participant,
            ReferencedEntity::JobRole(_) => ReferenceKind::JobRole,
            ReferencedEntity::Issue(_) => ReferenceKind::Issue,
            ReferencedEntity::InteractionSession(_) => ReferenceKind::InteractionSession,
        }
    }
}

/// Polymorphic participant as it arrives in payloads: any subset of the
/// concrete pointers may be filled in.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferencedParticipant {
    #[serde(default)]
    pub user: Option<ReferencedUser>,
    #[serde(default)]
    pub contact: Option<ReferencedContact>,
    #[serde(default)]
    pub organization: Option<ReferencedOrganization>,
    #[serde(default)]
    pub participant: Option<ReferencedAny>,
    #[serde(default)]
    pub job_role: Option<ReferencedJobRole>,
}

impl ReferencedParticipant {
    pub fn user(reference: ReferencedUser) -> Self {
        Self {
            user: Some(reference),
            ..Default::default()
        }
    }

    pub fn organization(reference: ReferencedOrganization) -> Self {
        Self {
            organization: Some(reference),
            ..Default::default()
        }
    }

    pub fn contact(reference: ReferencedContact) -> Self {
        Self {
            contact: Some(reference),
            ..Default::default()
        }
    }

    /// Concrete pointers in resolution priority order.
    pub fn candidates(&self) -> Vec<ReferencedEntity> {
        let mut out = Vec::new();
        if let Some(r) = &self.user {
            out.push(ReferencedEntity::User(r.clone()));
        }
        if let Some(r) = &self.contact {
            out.push(ReferencedEntity::Contact(r.clone()));
        }
        if let Some(r) = &self.organization {
            out.push(ReferencedEntity::Organization(r.clone()));
        }
        if let Some(r) = &self.participant {
            out.push(ReferencedEntity::Participant(r.clone()));
        }
        if let Some(r) = &self.job_role {
            out.push(ReferencedEntity::JobRole(r.clone()));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.candidates().is_empty()
    }
}

/// Outcome of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    pub id: String,
    pub kind: ReferenceKind,
}

impl ReferencedUser {
    pub fn by_external_id(external_id: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            ..Default::default()
        }
    }

    pub fn normalize(&mut self) {
        self.id = non_blank(self.id.take());
        self.external_id = non_blank(self.external_id.take());
        self.external_id_second = non_blank(self.external_id_second.take());
    }
}

impl ReferencedContact {
    pub fn by_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Default::default()
        }
    }

    pub fn normalize(&mut self) {
        self.id = non_blank(self.id.take());
        self.external_id = non_blank(self.external_id.take());
        self.email = non_blank(self.email.take()).map(|e| e.to_lowercase());
    }
}

impl ReferencedOrganization {
    pub fn by_external_id(external_id: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            ..Default::default()
        }
    }

    pub fn by_domain(domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
            ..Default::default()
        }
    }

    pub fn normalize(&mut self) {
        self.id = non_blank(self.id.take());
        self.external_id = non_blank(self.external_id.take());
        self.domain = non_blank(self.domain.take()).map(|d| d.to_lowercase());
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.external_id.is_none() && self.domain.is_none()
    }
}

impl ReferencedIssue {
    pub fn by_external_id(external_id: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            ..Default::default()
        }
    }

    pub fn normalize(&mut self) {
        self.id = non_blank(self.id.take());
        self.external_id = non_blank(self.external_id.take());
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.external_id.is_none()
    }
}

impl ReferencedInteractionSession {
    pub fn by_external_id(external_id: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            ..Default::default()
        }
    }

    pub fn normalize(&mut self) {
        self.id = non_blank(self.id.take());
        self.external_id = non_blank(self.external_id.take());
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.external_id.is_none()
    }
}

impl ReferencedParticipant {
    pub fn normalize(&mut self) {
        if let Some(r) = self.user.as_mut() {
            r.normalize();
        }
        if let Some(r) = self.contact.as_mut() {
            r.normalize();
        }
        if let Some(r) = self.organization.as_mut() {
            r.normalize();
        }
        if let Some(r) = self.participant.as_mut() {
            r.id = non_blank(r.id.take());
            r.external_id = non_blank(r.external_id.take());
        }
        if let Some(r) = self.job_role.as_mut() {
            r.contact.normalize();
            r.organization.normalize();
        }
    }
}
