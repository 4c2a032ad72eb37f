//! In-process entity graph implementing every backend contract.
//!
//! Newly created entities stay invisible to readers for a configurable number
//! of `get_by_id` calls, which mimics the asynchronous projection of the real
//! read model. External ids, emails and domains are unique per tenant and
//! kind; a command that would break that is rejected with `Conflict`, which
//! is the only protection against two processes racing on the same key.
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{
    CommandApi, EntityRecord, ExternalSystemRegistry, Link, LinkCommand, NaturalKey, ReadModel,
    TenantDirectory, UpsertCommand,
};
use crate::error::BackendError;
use crate::model::EntityKind;

type ExternalKey = (String, EntityKind, String, String);
type UniqueKey = (String, EntityKind, NaturalKey);

#[derive(Debug)]
struct Stored {
    record: EntityRecord,
    hidden_reads: u32,
}

#[derive(Debug, Default)]
struct GraphState {
    tenants: HashSet<String>,
    entities: HashMap<(String, String), Stored>,
    external_ids: HashMap<ExternalKey, String>,
    unique_keys: HashMap<UniqueKey, String>,
    job_roles: HashMap<(String, String, String), String>,
    registrations: HashSet<(String, String)>,
    upserts: Vec<UpsertCommand>,
    links: Vec<LinkCommand>,
    creates: HashMap<EntityKind, usize>,
    merge_calls: usize,
    projection_lag: u32,
    command_latency: Duration,
    upsert_failures: VecDeque<BackendError>,
    link_failures: VecDeque<BackendError>,
    merge_failures: VecDeque<BackendError>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryGraph {
    state: Arc<Mutex<GraphState>>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_tenant(&self, tenant: &str) {
        self.state.lock().await.tenants.insert(tenant.to_string());
    }

    /// Number of `get_by_id` misses a freshly created entity produces.
    pub async fn set_projection_lag(&self, reads: u32) {
        self.state.lock().await.projection_lag = reads;
    }

    /// Delay applied to every upsert before it takes effect.
    pub async fn set_command_latency(&self, latency: Duration) {
        self.state.lock().await.command_latency = latency;
    }

    pub async fn fail_next_upserts(&self, errors: impl IntoIterator<Item = BackendError>) {
        self.state.lock().await.upsert_failures.extend(errors);
    }

    pub async fn fail_next_links(&self, errors: impl IntoIterator<Item = BackendError>) {
        self.state.lock().await.link_failures.extend(errors);
    }

    pub async fn fail_next_merges(&self, errors: impl IntoIterator<Item = BackendError>) {
        self.state.lock().await.merge_failures.extend(errors);
    }

    /// Insert an already projected entity.
    pub async fn seed(
        &self,
        tenant: &str,
        kind: EntityKind,
        id: &str,
        external: Option<(&str, &str)>,
        keys: &[NaturalKey],
    ) {
        let mut st = self.state.lock().await;
        st.entities.insert(
            (tenant.to_string(), id.to_string()),
            Stored {
                record: EntityRecord {
                    id: id.to_string(),
                    tenant: tenant.to_string(),
                    kind,
                    attributes: serde_json::Value::Null,
                },
                hidden_reads: 0,
            },
        );
        if let Some((system, ext)) = external {
            st.external_ids.insert(
                (tenant.to_string(), kind, system.to_string(), ext.to_string()),
                id.to_string(),
            );
        }
        for key in keys {
            st.unique_keys
                .insert((tenant.to_string(), kind, key.clone()), id.to_string());
        }
    }

    pub async fn seed_job_role(&self, tenant: &str, contact_id: &str, organization_id: &str, id: &str) {
        self.state.lock().await.job_roles.insert(
            (
                tenant.to_string(),
                contact_id.to_string(),
                organization_id.to_string(),
            ),
            id.to_string(),
        );
    }

    pub async fn create_count(&self, kind: EntityKind) -> usize {
        self.state.lock().await.creates.get(&kind).copied().unwrap_or(0)
    }

    pub async fn upserts(&self) -> Vec<UpsertCommand> {
        self.state.lock().await.upserts.clone()
    }

    pub async fn links_for(&self, id: &str) -> Vec<Link> {
        self.state
            .lock()
            .await
            .links
            .iter()
            .filter(|l| l.id == id)
            .map(|l| l.link.clone())
            .collect()
    }

    pub async fn merge_calls(&self) -> usize {
        self.state.lock().await.merge_calls
    }

    pub async fn is_registered(&self, tenant: &str, external_system: &str) -> bool {
        self.state
            .lock()
            .await
            .registrations
            .contains(&(tenant.to_string(), external_system.to_string()))
    }

    pub async fn entity_ids(&self, tenant: &str, kind: EntityKind) -> Vec<String> {
        let st = self.state.lock().await;
        let mut ids: Vec<String> = st
            .entities
            .values()
            .filter(|s| s.record.tenant == tenant && s.record.kind == kind)
            .map(|s| s.record.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn attributes(&self, tenant: &str, id: &str) -> Option<serde_json::Value> {
        self.state
            .lock()
            .await
            .entities
            .get(&(tenant.to_string(), id.to_string()))
            .map(|s| s.record.attributes.clone())
    }

    pub async fn id_for_external(
        &self,
        tenant: &str,
        kind: EntityKind,
        external_system: &str,
        external_id: &str,
    ) -> Option<String> {
        self.state
            .lock()
            .await
            .external_ids
            .get(&(
                tenant.to_string(),
                kind,
                external_system.to_string(),
                external_id.to_string(),
            ))
            .cloned()
    }
}

impl GraphState {
    fn visible(&self, tenant: &str, id: &str) -> bool {
        self.entities
            .get(&(tenant.to_string(), id.to_string()))
            .is_some_and(|s| s.hidden_reads == 0)
    }

    fn check_unique(&self, cmd: &UpsertCommand) -> Result<(), BackendError> {
        let mut owners = Vec::new();
        if let Some(ext) = &cmd.external {
            let system = ext.external_system_id.clone();
            if ext.has_external_id() {
                owners.push((
                    format!("external id {}", ext.external_id),
                    self.external_ids.get(&(
                        cmd.tenant.clone(),
                        cmd.kind,
                        system.clone(),
                        ext.external_id.clone(),
                    )),
                ));
            }
            if let Some(second) = &ext.external_id_second {
                owners.push((
                    format!("external id {second}"),
                    self.external_ids
                        .get(&(cmd.tenant.clone(), cmd.kind, system, second.clone())),
                ));
            }
        }
        for key in &cmd.natural_keys {
            owners.push((
                format!("{key:?}"),
                self.unique_keys
                    .get(&(cmd.tenant.clone(), cmd.kind, key.clone())),
            ));
        }
        for (label, owner) in owners {
            if let Some(owner) = owner {
                if owner != &cmd.id {
                    return Err(BackendError::Conflict(format!(
                        "{label} already belongs to {owner}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CommandApi for InMemoryGraph {
    async fn upsert(&self, cmd: UpsertCommand) -> Result<String, BackendError> {
        let latency = self.state.lock().await.command_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        if let Some(err) = st.upsert_failures.pop_front() {
            return Err(err);
        }
        if !st.tenants.contains(&cmd.tenant) {
            return Err(BackendError::Other(format!("unknown tenant {}", cmd.tenant)));
        }
        st.check_unique(&cmd)?;

        let entity_key = (cmd.tenant.clone(), cmd.id.clone());
        if let Some(existing) = st.entities.get_mut(&entity_key) {
            if existing.record.kind != cmd.kind {
                return Err(BackendError::Conflict(format!(
                    "{} is a {}",
                    cmd.id, existing.record.kind
                )));
            }
            merge_json(&mut existing.record.attributes, &cmd.attributes);
        } else {
            let lag = st.projection_lag;
            st.entities.insert(
                entity_key,
                Stored {
                    record: EntityRecord {
                        id: cmd.id.clone(),
                        tenant: cmd.tenant.clone(),
                        kind: cmd.kind,
                        attributes: cmd.attributes.clone(),
                    },
                    hidden_reads: lag,
                },
            );
            *st.creates.entry(cmd.kind).or_default() += 1;
        }

        if let Some(ext) = &cmd.external {
            let system = ext.external_system_id.clone();
            if ext.has_external_id() {
                st.external_ids.insert(
                    (cmd.tenant.clone(), cmd.kind, system.clone(), ext.external_id.clone()),
                    cmd.id.clone(),
                );
            }
            if let Some(second) = &ext.external_id_second {
                st.external_ids.insert(
                    (cmd.tenant.clone(), cmd.kind, system, second.clone()),
                    cmd.id.clone(),
                );
            }
        }
        for key in &cmd.natural_keys {
            st.unique_keys
                .insert((cmd.tenant.clone(), cmd.kind, key.clone()), cmd.id.clone());
        }
        let id = cmd.id.clone();
        st.upserts.push(cmd);
        Ok(id)
    }

    async fn link(&self, cmd: LinkCommand) -> Result<(), BackendError> {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        if let Some(err) = st.link_failures.pop_front() {
            return Err(err);
        }
        if !st
            .entities
            .contains_key(&(cmd.tenant.clone(), cmd.id.clone()))
        {
            return Err(BackendError::NotFound);
        }
        match &cmd.link {
            Link::Domain { domain } => {
                st.unique_keys.insert(
                    (cmd.tenant.clone(), cmd.kind, NaturalKey::Domain(domain.clone())),
                    cmd.id.clone(),
                );
            }
            Link::Email { email, .. } => {
                st.unique_keys.insert(
                    (cmd.tenant.clone(), cmd.kind, NaturalKey::Email(email.clone())),
                    cmd.id.clone(),
                );
            }
            Link::JobRole {
                organization_id, ..
            } => {
                let key = (cmd.tenant.clone(), cmd.id.clone(), organization_id.clone());
                st.job_roles
                    .entry(key)
                    .or_insert_with(|| uuid::Uuid::new_v4().to_string());
            }
            _ => {}
        }
        st.links.push(cmd);
        Ok(())
    }
}

#[async_trait]
impl ReadModel for InMemoryGraph {
    async fn get_by_id(
        &self,
        tenant: &str,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<EntityRecord>, BackendError> {
        let mut st = self.state.lock().await;
        let Some(stored) = st.entities.get_mut(&(tenant.to_string(), id.to_string())) else {
            return Ok(None);
        };
        if stored.record.kind != kind {
            return Ok(None);
        }
        if stored.hidden_reads > 0 {
            stored.hidden_reads -= 1;
            return Ok(None);
        }
        Ok(Some(stored.record.clone()))
    }

    async fn find_matching(
        &self,
        tenant: &str,
        kind: EntityKind,
        external_system: &str,
        keys: &[NaturalKey],
    ) -> Result<Option<String>, BackendError> {
        let st = self.state.lock().await;
        for key in keys {
            let found = match key {
                NaturalKey::ExternalId(ext) | NaturalKey::ExternalIdSecond(ext) => st
                    .external_ids
                    .get(&(
                        tenant.to_string(),
                        kind,
                        external_system.to_string(),
                        ext.clone(),
                    )),
                NaturalKey::Email(_) | NaturalKey::Domain(_) => st
                    .unique_keys
                    .get(&(tenant.to_string(), kind, key.clone())),
            };
            if let Some(id) = found {
                if st.visible(tenant, id) {
                    return Ok(Some(id.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn find_job_role(
        &self,
        tenant: &str,
        contact_id: &str,
        organization_id: &str,
    ) -> Result<Option<String>, BackendError> {
        Ok(self
            .state
            .lock()
            .await
            .job_roles
            .get(&(
                tenant.to_string(),
                contact_id.to_string(),
                organization_id.to_string(),
            ))
            .cloned())
    }
}

#[async_trait]
impl TenantDirectory for InMemoryGraph {
    async fn tenant_exists(&self, tenant: &str) -> Result<bool, BackendError> {
        Ok(self.state.lock().await.tenants.contains(tenant))
    }
}

#[async_trait]
impl ExternalSystemRegistry for InMemoryGraph {
    async fn merge_external_system(
        &self,
        tenant: &str,
        external_system: &str,
    ) -> Result<(), BackendError> {
        let mut st = self.state.lock().await;
        st.merge_calls += 1;
        if let Some(err) = st.merge_failures.pop_front() {
            return Err(err);
        }
        st.registrations
            .insert((tenant.to_string(), external_system.to_string()));
        Ok(())
    }
}

fn merge_json(target: &mut serde_json::Value, update: &serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(t), serde_json::Value::Object(u)) => {
            for (k, v) in u {
                t.insert(k.clone(), v.clone());
            }
        }
        (t, u) => *t = u.clone(),
    }
}
