//! Contracts of the collaborators the sync engine drives: the command API
//! that turns requests into domain events, the eventually consistent read
//! model, and the tenant/registry/summary stores.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::BackendError;
use crate::model::{EntityKind, ExternalReference, LocationInput, SyncRunSummary};

pub mod memory;

pub use memory::InMemoryGraph;

/// A uniqueness signal used to detect that two payloads describe the same
/// entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum NaturalKey {
    /// Scoped to the external system passed alongside.
    ExternalId(String),
    /// Scoped to the external system passed alongside.
    ExternalIdSecond(String),
    Email(String),
    Domain(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub tenant: String,
    pub kind: EntityKind,
    pub attributes: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertCommand {
    pub tenant: String,
    pub kind: EntityKind,
    /// Always set; minted by the caller when the entity is new.
    pub id: String,
    pub external: Option<ExternalReference>,
    pub app_source: String,
    /// Watermark of the batch this command belongs to.
    pub sync_date: DateTime<Utc>,
    pub natural_keys: Vec<NaturalKey>,
    pub attributes: serde_json::Value,
    pub create: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "link", rename_all = "snake_case")]
pub enum Link {
    Email { email: String, primary: bool },
    PhoneNumber { number: String, primary: bool },
    Location(LocationInput),
    SocialUrl { url: String },
    Domain { domain: String },
    ParentOrganization { parent_id: String, relationship: String },
    JobRole { organization_id: String, job_title: String },
    Follower { user_id: String },
    Assignee { user_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkCommand {
    pub tenant: String,
    pub kind: EntityKind,
    pub id: String,
    pub link: Link,
}

#[async_trait]
pub trait CommandApi: Send + Sync {
    /// Returns the id of the upserted entity.
    async fn upsert(&self, cmd: UpsertCommand) -> Result<String, BackendError>;

    async fn link(&self, cmd: LinkCommand) -> Result<(), BackendError>;
}

#[async_trait]
pub trait ReadModel: Send + Sync {
    async fn get_by_id(
        &self,
        tenant: &str,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<EntityRecord>, BackendError>;

    /// First entity of `kind` matching any of `keys`, in key order.
    async fn find_matching(
        &self,
        tenant: &str,
        kind: EntityKind,
        external_system: &str,
        keys: &[NaturalKey],
    ) -> Result<Option<String>, BackendError>;

    /// Id of the job role linking a contact to an organization.
    async fn find_job_role(
        &self,
        tenant: &str,
        contact_id: &str,
        organization_id: &str,
    ) -> Result<Option<String>, BackendError>;
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn tenant_exists(&self, tenant: &str) -> Result<bool, BackendError>;
}

#[async_trait]
pub trait ExternalSystemRegistry: Send + Sync {
    /// Idempotent registration of an external system for a tenant.
    async fn merge_external_system(
        &self,
        tenant: &str,
        external_system: &str,
    ) -> Result<(), BackendError>;
}

#[async_trait]
pub trait RunSummaryStore: Send + Sync {
    async fn save(&self, summary: &SyncRunSummary) -> anyhow::Result<()>;
}

/// Everything an orchestrator talks to.
#[derive(Clone)]
pub struct SyncDeps {
    pub commands: Arc<dyn CommandApi>,
    pub reads: Arc<dyn ReadModel>,
    pub tenants: Arc<dyn TenantDirectory>,
    pub registry: Arc<dyn ExternalSystemRegistry>,
    pub summaries: Arc<dyn RunSummaryStore>,
}

impl SyncDeps {
    /// Wire every backend role to one in-memory graph.
    pub fn in_memory(graph: &InMemoryGraph, summaries: Arc<dyn RunSummaryStore>) -> Self {
        let graph = Arc::new(graph.clone());
        Self {
            commands: graph.clone(),
            reads: graph.clone(),
            tenants: graph.clone(),
            registry: graph,
            summaries,
        }
    }
}
