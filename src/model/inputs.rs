//! Inbound payloads, one per entity kind.
//!
//! `normalize` only does kind-agnostic cleanup (trimming, lower-casing keys,
//! de-duplicating lists, timestamp backfill). Kind-specific rules live with
//! the matching sync strategy.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::non_blank;
use super::reference::{
    ReferencedInteractionSession, ReferencedIssue, ReferencedOrganization, ReferencedParticipant,
    ReferencedUser,
};
use super::SyncMeta;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocationInput {
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub locality: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub zip: String,
}

impl LocationInput {
    fn normalize(&mut self) {
        for f in [
            &mut self.country,
            &mut self.region,
            &mut self.locality,
            &mut self.address,
            &mut self.zip,
        ] {
            *f = f.trim().to_string();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.country.is_empty()
            && self.region.is_empty()
            && self.locality.is_empty()
            && self.address.is_empty()
            && self.zip.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactInput {
    #[serde(flatten)]
    pub meta: SyncMeta,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub job_title: String,
    /// First entry is the primary email.
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub phone_numbers: Vec<String>,
    #[serde(default)]
    pub location: Option<LocationInput>,
    #[serde(default)]
    pub social_urls: Vec<String>,
    #[serde(default)]
    pub organizations: Vec<ReferencedOrganization>,
    #[serde(default)]
    pub organization_required: bool,
}

impl ContactInput {
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        self.meta.normalize(now);
        self.first_name = self.first_name.trim().to_string();
        self.last_name = self.last_name.trim().to_string();
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            self.name = format!("{} {}", self.first_name, self.last_name)
                .trim()
                .to_string();
        }
        self.job_title = self.job_title.trim().to_string();
        self.emails = dedup_lower(std::mem::take(&mut self.emails));
        self.phone_numbers = dedup_trimmed(std::mem::take(&mut self.phone_numbers));
        self.social_urls = dedup_trimmed(std::mem::take(&mut self.social_urls));
        if let Some(location) = self.location.as_mut() {
            location.normalize();
        }
        if self.location.as_ref().is_some_and(LocationInput::is_empty) {
            self.location = None;
        }
        for org in self.organizations.iter_mut() {
            org.normalize();
        }
        self.organizations.retain(|o| !o.is_empty());
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrganizationInput {
    #[serde(flatten)]
    pub meta: SyncMeta,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub domain_required: bool,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub employees: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_numbers: Vec<String>,
    #[serde(default)]
    pub location: Option<LocationInput>,
    #[serde(default)]
    pub social_urls: Vec<String>,
    /// Set for sub-organizations.
    #[serde(default)]
    pub parent: Option<ReferencedOrganization>,
    #[serde(default)]
    pub parent_relationship: String,
}

impl OrganizationInput {
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        self.meta.normalize(now);
        self.name = self.name.trim().to_string();
        self.website = self.website.trim().to_string();
        self.industry = self.industry.trim().to_string();
        self.domains = dedup_lower(std::mem::take(&mut self.domains));
        self.email = non_blank(self.email.take()).map(|e| e.to_lowercase());
        self.phone_numbers = dedup_trimmed(std::mem::take(&mut self.phone_numbers));
        self.social_urls = dedup_trimmed(std::mem::take(&mut self.social_urls));
        if let Some(location) = self.location.as_mut() {
            location.normalize();
        }
        if self.location.as_ref().is_some_and(LocationInput::is_empty) {
            self.location = None;
        }
        if let Some(parent) = self.parent.as_mut() {
            parent.normalize();
        }
        if self.parent.as_ref().is_some_and(ReferencedOrganization::is_empty) {
            self.parent = None;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInput {
    #[serde(flatten)]
    pub meta: SyncMeta,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_numbers: Vec<String>,
    #[serde(default)]
    pub profile_photo_url: Option<String>,
    #[serde(default)]
    pub timezone: String,
}

impl UserInput {
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        self.meta.normalize(now);
        self.first_name = self.first_name.trim().to_string();
        self.last_name = self.last_name.trim().to_string();
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            self.name = format!("{} {}", self.first_name, self.last_name)
                .trim()
                .to_string();
        }
        self.email = non_blank(self.email.take()).map(|e| e.to_lowercase());
        self.phone_numbers = dedup_trimmed(std::mem::take(&mut self.phone_numbers));
        self.profile_photo_url = non_blank(self.profile_photo_url.take());
        self.timezone = self.timezone.trim().to_string();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssueInput {
    #[serde(flatten)]
    pub meta: SyncMeta,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub reporter: Option<ReferencedParticipant>,
    #[serde(default)]
    pub submitter: Option<ReferencedParticipant>,
    #[serde(default)]
    pub followers: Vec<ReferencedParticipant>,
    #[serde(default)]
    pub collaborators: Vec<ReferencedParticipant>,
    #[serde(default)]
    pub assignee: Option<ReferencedUser>,
    /// Skip the issue unless the reporter resolves to an organization.
    #[serde(default)]
    pub organization_required: bool,
}

impl IssueInput {
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        self.meta.normalize(now);
        self.subject = self.subject.trim().to_string();
        self.status = self.status.trim().to_lowercase();
        self.priority = self.priority.trim().to_lowercase();
        for p in self
            .reporter
            .iter_mut()
            .chain(self.submitter.iter_mut())
            .chain(self.followers.iter_mut())
            .chain(self.collaborators.iter_mut())
        {
            p.normalize();
        }
        self.followers.retain(|p| !p.is_empty());
        self.collaborators.retain(|p| !p.is_empty());
        self.followers.dedup();
        self.collaborators.dedup();
        if let Some(a) = self.assignee.as_mut() {
            a.normalize();
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderInput {
    #[serde(flatten)]
    pub meta: SyncMeta,
    #[serde(default)]
    pub ordered_by: ReferencedOrganization,
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fulfilled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub canceled_at: Option<DateTime<Utc>>,
}

impl OrderInput {
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        self.meta.normalize(now);
        self.ordered_by.normalize();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentInput {
    #[serde(flatten)]
    pub meta: SyncMeta,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub commented_issue: ReferencedIssue,
    #[serde(default)]
    pub author_user: Option<ReferencedUser>,
}

impl CommentInput {
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        self.meta.normalize(now);
        self.content_type = self.content_type.trim().to_lowercase();
        self.commented_issue.normalize();
        if let Some(a) = self.author_user.as_mut() {
            a.normalize();
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntryInput {
    #[serde(flatten)]
    pub meta: SyncMeta,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub logged_organization: ReferencedOrganization,
    #[serde(default)]
    pub logged_entity_required: bool,
    #[serde(default)]
    pub author_user: Option<ReferencedUser>,
}

impl LogEntryInput {
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        self.meta.normalize(now);
        self.content_type = self.content_type.trim().to_lowercase();
        self.started_at.get_or_insert(now);
        self.logged_organization.normalize();
        if let Some(a) = self.author_user.as_mut() {
            a.normalize();
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InteractionSessionInput {
    #[serde(flatten)]
    pub meta: SyncMeta,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "type")]
    pub session_type: String,
    #[serde(default)]
    pub channel: String,
    /// Channel-specific thread key, e.g. the root message id of a mail thread.
    #[serde(default)]
    pub identifier: String,
}

impl InteractionSessionInput {
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        self.meta.normalize(now);
        self.name = self.name.trim().to_string();
        self.status = self.status.trim().to_uppercase();
        self.session_type = self.session_type.trim().to_uppercase();
        self.channel = self.channel.trim().to_uppercase();
        self.identifier = self.identifier.trim().to_string();
    }
}

/// Where an interaction event sits: an issue conversation or a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BelongsTo {
    #[serde(default)]
    pub issue: Option<ReferencedIssue>,
    #[serde(default)]
    pub session: Option<ReferencedInteractionSession>,
}

impl BelongsTo {
    fn normalize(&mut self) {
        if let Some(issue) = self.issue.as_mut() {
            issue.normalize();
        }
        if self.issue.as_ref().is_some_and(ReferencedIssue::is_empty) {
            self.issue = None;
        }
        if let Some(session) = self.session.as_mut() {
            session.normalize();
        }
        if self
            .session
            .as_ref()
            .is_some_and(ReferencedInteractionSession::is_empty)
        {
            self.session = None;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.issue.is_none() && self.session.is_none()
    }
}

/// Sender or receiver of an interaction event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InteractionParticipant {
    #[serde(flatten)]
    pub participant: ReferencedParticipant,
    /// TO, CC, BCC and the like; empty when the channel has no such notion.
    #[serde(default)]
    pub relation_type: String,
}

impl InteractionParticipant {
    pub fn new(participant: ReferencedParticipant, relation_type: impl Into<String>) -> Self {
        Self {
            participant,
            relation_type: relation_type.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InteractionEventInput {
    #[serde(flatten)]
    pub meta: SyncMeta,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub channel: String,
    /// Opaque channel payload, stored as given.
    #[serde(default)]
    pub channel_data: Option<String>,
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub belongs_to: BelongsTo,
    #[serde(default)]
    pub sent_by: Option<InteractionParticipant>,
    #[serde(default)]
    pub sent_to: Vec<InteractionParticipant>,
    /// Skip the event unless its issue or session resolves.
    #[serde(default)]
    pub parent_required: bool,
    /// Skip the event unless the sender or a receiver is a known contact.
    #[serde(default)]
    pub contact_required: bool,
}

impl InteractionEventInput {
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        self.meta.normalize(now);
        self.content_type = self.content_type.trim().to_lowercase();
        self.channel = self.channel.trim().to_uppercase();
        self.channel_data = non_blank(self.channel_data.take());
        self.identifier = self.identifier.trim().to_string();
        self.event_type = self.event_type.trim().to_string();
        self.belongs_to.normalize();
        for p in self.sent_by.iter_mut().chain(self.sent_to.iter_mut()) {
            p.participant.normalize();
            p.relation_type = p.relation_type.trim().to_uppercase();
        }
        if self.sent_by.as_ref().is_some_and(|p| p.participant.is_empty()) {
            self.sent_by = None;
        }
        self.sent_to.retain(|p| !p.participant.is_empty());
        self.sent_to.dedup();
    }
}

/// A raw mail message. Address fields hold header values such as
/// `"Ada Lovelace" <ada@acme.com>, bob@acme.com`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailInput {
    /// `external.external_id` is the message id.
    #[serde(flatten)]
    pub meta: SyncMeta,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub sent_by: String,
    #[serde(default)]
    pub sent_to: String,
    #[serde(default)]
    pub cc: String,
    #[serde(default)]
    pub bcc: String,
    /// Thread key; messages sharing it land in one session.
    #[serde(default)]
    pub thread_id: String,
    /// Newline separated message ids.
    #[serde(default)]
    pub references: String,
    /// Newline separated message ids.
    #[serde(default)]
    pub in_reply_to: String,
}

fn dedup_lower(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        let v = v.trim().to_lowercase();
        if !v.is_empty() && !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

fn dedup_trimmed(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        let v = v.trim().to_string();
        if !v.is_empty() && !out.contains(&v) {
            out.push(v);
        }
    }
    out
}
