//! Domain types shared by the sync engine, the event consumer and the
//! webhook workflow.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod event;
pub mod inputs;
pub mod reference;
pub mod webhook;

pub use event::DomainEvent;
pub use inputs::{
    BelongsTo, CommentInput, ContactInput, EmailInput, InteractionEventInput,
    InteractionParticipant, InteractionSessionInput, IssueInput, LocationInput, LogEntryInput,
    OrderInput, OrganizationInput, UserInput,
};
pub use reference::{
    ReferenceKind, ReferencedContact, ReferencedEntity, ReferencedInteractionSession,
    ReferencedIssue, ReferencedJobRole, ReferencedOrganization, ReferencedParticipant,
    ReferencedUser, ResolvedEntity,
};
pub use webhook::{FailureNotice, RetryPolicy, WebhookDeliveryJob};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Contact,
    Organization,
    User,
    Issue,
    Order,
    Comment,
    LogEntry,
    InteractionSession,
    InteractionEvent,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Contact => "contact",
            EntityKind::Organization => "organization",
            EntityKind::User => "user",
            EntityKind::Issue => "issue",
            EntityKind::Order => "order",
            EntityKind::Comment => "comment",
            EntityKind::LogEntry => "log_entry",
            EntityKind::InteractionSession => "interaction_session",
            EntityKind::InteractionEvent => "interaction_event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contact" => Some(EntityKind::Contact),
            "organization" => Some(EntityKind::Organization),
            "user" => Some(EntityKind::User),
            "issue" => Some(EntityKind::Issue),
            "order" => Some(EntityKind::Order),
            "comment" => Some(EntityKind::Comment),
            "log_entry" => Some(EntityKind::LogEntry),
            "interaction_session" => Some(EntityKind::InteractionSession),
            "interaction_event" => Some(EntityKind::InteractionEvent),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one record inside one external system.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalReference {
    #[serde(default)]
    pub external_system_id: String,
    #[serde(default)]
    pub external_id: String,
    #[serde(default)]
    pub external_id_second: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub external_source_entity: Option<String>,
    /// Watermark of the batch that last carried this record.
    #[serde(default)]
    pub sync_date: Option<DateTime<Utc>>,
}

impl ExternalReference {
    pub fn new(external_system_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            external_system_id: external_system_id.into(),
            external_id: external_id.into(),
            ..Default::default()
        }
    }

    pub fn normalize(&mut self) {
        self.external_system_id = self.external_system_id.trim().to_lowercase();
        self.external_id = self.external_id.trim().to_string();
        self.external_id_second = non_blank(self.external_id_second.take());
        self.external_url = non_blank(self.external_url.take());
        self.external_source_entity = non_blank(self.external_source_entity.take());
    }

    pub fn has_external_id(&self) -> bool {
        !self.external_id.is_empty()
    }
}

/// Fields every sync payload carries regardless of its kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncMeta {
    /// Internal id, used by update-only flows that address an entity directly.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub external: ExternalReference,
    #[serde(default)]
    pub app_source: String,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub skip_reason: String,
    #[serde(default)]
    pub update_only: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SyncMeta {
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        self.id = non_blank(self.id.take());
        self.external.normalize();
        self.app_source = self.app_source.trim().to_string();
        self.skip_reason = self.skip_reason.trim().to_string();
        let created_at = *self.created_at.get_or_insert(now);
        self.updated_at.get_or_insert(created_at);
    }

    pub fn external_system(&self) -> &str {
        &self.external.external_system_id
    }
}

/// Outcome of one item of a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Skipped { reason: String },
    Failed { reason: String },
}

impl SyncStatus {
    pub fn skipped(reason: impl Into<String>) -> Self {
        SyncStatus::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        SyncStatus::Failed {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            SyncStatus::Success => None,
            SyncStatus::Skipped { reason } | SyncStatus::Failed { reason } => {
                Some(reason.as_str()).filter(|r| !r.is_empty())
            }
        }
    }
}

/// Persisted result of one batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRunSummary {
    pub tenant: String,
    pub external_system_id: String,
    pub app_source: String,
    pub entity_kind: EntityKind,
    /// Watermark shared by every item of the batch.
    #[serde(default)]
    pub sync_date: Option<DateTime<Utc>>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
    /// Most recent non-empty reason; earlier ones are only kept in `reason_counts`.
    pub last_reason: String,
    pub reason_counts: BTreeMap<String, u32>,
}

impl SyncRunSummary {
    pub fn empty(tenant: &str, entity_kind: EntityKind, start_at: DateTime<Utc>) -> Self {
        Self {
            tenant: tenant.to_string(),
            external_system_id: String::new(),
            app_source: String::new(),
            entity_kind,
            sync_date: None,
            start_at,
            end_at: start_at,
            total: 0,
            completed: 0,
            failed: 0,
            skipped: 0,
            last_reason: String::new(),
            reason_counts: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, status: &SyncStatus) {
        self.total += 1;
        match status {
            SyncStatus::Success => self.completed += 1,
            SyncStatus::Skipped { .. } => self.skipped += 1,
            SyncStatus::Failed { .. } => self.failed += 1,
        }
        if let Some(reason) = status.reason() {
            self.last_reason = reason.to_string();
            *self.reason_counts.entry(reason.to_string()).or_default() += 1;
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.total == self.completed + self.failed + self.skipped
    }
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_arithmetic_holds_for_mixed_outcomes() {
        let statuses = vec![
            SyncStatus::Success,
            SyncStatus::skipped("flagged"),
            SyncStatus::failed("boom"),
            SyncStatus::skipped(""),
            SyncStatus::Success,
        ];
        let mut summary = SyncRunSummary::empty("t1", EntityKind::Contact, Utc::now());
        for s in &statuses {
            summary.record(s);
        }
        assert_eq!(summary.total, 5);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failed, 1);
        assert!(summary.is_consistent());
        assert_eq!(summary.last_reason, "boom");
        assert_eq!(summary.reason_counts.get("flagged"), Some(&1));
    }

    #[test]
    fn last_reason_ignores_empty_reasons() {
        let mut summary = SyncRunSummary::empty("t1", EntityKind::User, Utc::now());
        summary.record(&SyncStatus::failed("first"));
        summary.record(&SyncStatus::skipped("  "));
        summary.record(&SyncStatus::Success);
        assert_eq!(summary.last_reason, "first");
    }

    #[test]
    fn meta_normalize_backfills_timestamps() {
        let now = Utc::now();
        let mut meta = SyncMeta {
            id: Some("  ".into()),
            external: ExternalReference::new(" HubSpot ", " 42 "),
            ..Default::default()
        };
        meta.normalize(now);
        assert_eq!(meta.id, None);
        assert_eq!(meta.external.external_system_id, "hubspot");
        assert_eq!(meta.external.external_id, "42");
        assert_eq!(meta.created_at, Some(now));
        assert_eq!(meta.updated_at, Some(now));
    }

    #[test]
    fn entity_kind_round_trips_through_str() {
        for kind in [
            EntityKind::Contact,
            EntityKind::Organization,
            EntityKind::User,
            EntityKind::Issue,
            EntityKind::Order,
            EntityKind::Comment,
            EntityKind::LogEntry,
            EntityKind::InteractionSession,
            EntityKind::InteractionEvent,
        ] {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("invoice"), None);
    }
}
