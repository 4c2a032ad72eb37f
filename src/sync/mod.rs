//! Batch synchronization of external records into the entity graph.
//!
//! One [`Orchestrator`] exists per entity kind. It validates the batch up
//! front, fans items out over a bounded pool, and runs every item through the
//! same state machine:
//!
//! 1. normalize the payload
//! 2. register the external system (TTL cached)
//! 3. honor the explicit skip flag and kind-specific prechecks
//! 4. resolve cross references; a missing required one skips the item
//! 5. under the orchestrator lock: match-or-create, send the upsert command,
//!    and on create wait until the read model shows the entity
//! 6. outside the lock: send the independent link commands concurrently
//!
//! Per-item problems end up in the item's [`SyncStatus`]; only validation,
//! cancellation and deadline errors fail the whole call.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::backend::{Link, LinkCommand, NaturalKey, SyncDeps, UpsertCommand};
use crate::cache::ExternalSystemCache;
use crate::config::SyncConfig;
use crate::error::{BackendError, SyncError};
use crate::finder::Finder;
use crate::model::{EntityKind, ExternalReference, SyncMeta, SyncRunSummary, SyncStatus};
use crate::poll::poll_until;
use crate::pool;
use crate::resolver::{MatchOrCreate, MatchRequest};
use crate::retry::{retry_transient, RetrySettings};

pub mod comment;
pub mod contact;
pub mod email;
pub mod interaction_event;
pub mod interaction_session;
pub mod issue;
pub mod log_entry;
pub mod order;
pub mod organization;
pub mod user;

pub use comment::CommentSync;
pub use contact::ContactSync;
pub use email::{EmailSync, EmailSyncSummary};
pub use interaction_event::InteractionEventSync;
pub use interaction_session::InteractionSessionSync;
pub use issue::IssueSync;
pub use log_entry::LogEntrySync;
pub use order::OrderSync;
pub use organization::OrganizationSync;
pub use user::UserSync;

/// Result of reference resolution for one item.
#[derive(Debug)]
pub enum Prepared<T> {
    Ready(T),
    /// A required reference is missing; the item is skipped with this reason.
    Skip(String),
}

/// Per-item view handed to strategies while resolving references.
pub struct ItemContext<'a> {
    pub tenant: &'a str,
    pub external_system: &'a str,
    pub finder: &'a Finder,
}

/// Kind-specific part of the item state machine.
#[async_trait]
pub trait EntitySync: Send + Sync + 'static {
    type Input: Send + Sync + 'static;
    type Refs: Send + Sync + 'static;

    fn kind(&self) -> EntityKind;

    fn meta<'a>(&self, input: &'a Self::Input) -> &'a SyncMeta;

    fn normalize(&self, input: &mut Self::Input, now: DateTime<Utc>);

    /// Data-quality conditions that skip the item before any remote call.
    fn precheck(&self, _input: &Self::Input) -> Option<String> {
        None
    }

    async fn resolve_references(
        &self,
        cx: &ItemContext<'_>,
        input: &Self::Input,
    ) -> Result<Prepared<Self::Refs>, BackendError>;

    fn natural_keys(&self, _input: &Self::Input) -> Vec<NaturalKey> {
        Vec::new()
    }

    fn attributes(&self, input: &Self::Input, refs: &Self::Refs) -> serde_json::Value;

    fn links(&self, _input: &Self::Input, _refs: &Self::Refs) -> Vec<Link> {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub concurrency: usize,
    /// Lower-cased allow-list.
    pub accepted_external_systems: HashSet<String>,
    pub per_item_timeout: Duration,
    pub batch_timeout_ceiling: Duration,
    pub visibility_poll: RetrySettings,
    pub command_retry: RetrySettings,
}

impl SyncSettings {
    pub fn from_config(cfg: &SyncConfig, kind: EntityKind) -> Self {
        Self {
            concurrency: cfg.concurrency_for(kind),
            accepted_external_systems: cfg
                .accepted_external_systems
                .iter()
                .map(|s| s.trim().to_lowercase())
                .collect(),
            per_item_timeout: cfg.per_item_timeout(),
            batch_timeout_ceiling: cfg.batch_timeout_ceiling(),
            visibility_poll: cfg.visibility_poll.into(),
            command_retry: cfg.command_retry.into(),
        }
    }

    /// Per-item allowance times item count, capped at the ceiling.
    pub fn deadline_for(&self, items: usize) -> Duration {
        let n = u32::try_from(items).unwrap_or(u32::MAX);
        self.per_item_timeout
            .saturating_mul(n)
            .min(self.batch_timeout_ceiling)
    }
}

pub struct Orchestrator<S: EntitySync> {
    inner: Arc<Inner<S>>,
}

impl<S: EntitySync> Clone for Orchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<S: EntitySync> {
    strategy: S,
    deps: SyncDeps,
    finder: Finder,
    resolver: MatchOrCreate,
    cache: ExternalSystemCache,
    settings: SyncSettings,
    /// Serializes check-then-create within this orchestrator only.
    create_lock: Mutex<()>,
}

impl<S: EntitySync> Orchestrator<S> {
    pub fn new(
        strategy: S,
        deps: SyncDeps,
        cache: ExternalSystemCache,
        settings: SyncSettings,
    ) -> Self {
        let finder = Finder::new(deps.reads.clone());
        let resolver = MatchOrCreate::new(deps.reads.clone());
        Self {
            inner: Arc::new(Inner {
                strategy,
                deps,
                finder,
                resolver,
                cache,
                settings,
                create_lock: Mutex::new(()),
            }),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.inner.strategy.kind()
    }

    /// Sync a batch stamped with the current time.
    pub async fn sync_batch(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        items: Vec<S::Input>,
    ) -> Result<SyncRunSummary, SyncError> {
        self.sync_batch_at(cancel, tenant, Utc::now(), items).await
    }

    /// Sync a batch whose items all carry `sync_date` as their watermark.
    #[instrument(skip_all, fields(tenant = %tenant, items = items.len(), %sync_date))]
    pub async fn sync_batch_at(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        sync_date: DateTime<Utc>,
        items: Vec<S::Input>,
    ) -> Result<SyncRunSummary, SyncError> {
        let start_at = Utc::now();
        let kind = self.kind();

        if !self.inner.deps.tenants.tenant_exists(tenant).await? {
            return Err(SyncError::TenantNotValid);
        }
        self.validate(&items)?;
        if items.is_empty() {
            let mut summary = SyncRunSummary::empty(tenant, kind, start_at);
            summary.sync_date = Some(sync_date);
            return Ok(summary);
        }

        let first = self.inner.strategy.meta(&items[0]);
        let external_system = first.external.external_system_id.trim().to_lowercase();
        let app_source = first.app_source.trim().to_string();
        let total = items.len();

        let batch_cancel = cancel.child_token();
        let deadline = self.inner.settings.deadline_for(total);
        let timer = {
            let token = batch_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                token.cancel();
            })
        };

        let inner = self.inner.clone();
        let item_tenant = tenant.to_string();
        let item_cancel = batch_cancel.clone();
        let outcome = pool::run_bounded(
            items,
            self.inner.settings.concurrency,
            &batch_cancel,
            move |item| {
                let inner = inner.clone();
                let tenant = item_tenant.clone();
                let cancel = item_cancel.clone();
                async move { inner.process_item(&tenant, sync_date, item, &cancel).await }
            },
        )
        .await;
        timer.abort();

        if outcome.is_err() || batch_cancel.is_cancelled() {
            let err = if cancel.is_cancelled() {
                SyncError::Cancelled
            } else {
                SyncError::DeadlineExceeded
            };
            warn!(%kind, ?deadline, %err, "batch interrupted; summary not persisted");
            return Err(err);
        }
        let mut statuses = outcome.unwrap_or_default();
        while statuses.len() < total {
            statuses.push(SyncStatus::failed("item worker crashed"));
        }

        let mut summary = SyncRunSummary::empty(tenant, kind, start_at);
        summary.external_system_id = external_system;
        summary.app_source = app_source;
        summary.sync_date = Some(sync_date);
        for status in &statuses {
            summary.record(status);
        }
        summary.end_at = Utc::now();

        if let Err(err) = self.inner.deps.summaries.save(&summary).await {
            warn!(?err, %kind, "failed to persist sync run summary");
        }
        info!(
            %kind,
            total = summary.total,
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch synced"
        );
        Ok(summary)
    }

    /// Whole-batch validation; one bad item rejects the call.
    fn validate(&self, items: &[S::Input]) -> Result<(), SyncError> {
        let accepted = &self.inner.settings.accepted_external_systems;
        for item in items {
            let meta = self.inner.strategy.meta(item);
            let system = meta.external.external_system_id.trim().to_lowercase();
            if system.is_empty() {
                let addressed_by_id = meta.update_only
                    && meta.id.as_deref().is_some_and(|id| !id.trim().is_empty());
                if addressed_by_id {
                    continue;
                }
                return Err(SyncError::MissingExternalSystem);
            }
            if !accepted.contains(&system) {
                return Err(SyncError::ExternalSystemNotAccepted(system));
            }
        }
        Ok(())
    }
}

impl<S: EntitySync> Inner<S> {
    async fn process_item(
        &self,
        tenant: &str,
        sync_date: DateTime<Utc>,
        mut input: S::Input,
        cancel: &CancellationToken,
    ) -> SyncStatus {
        let kind = self.strategy.kind();
        self.strategy.normalize(&mut input, Utc::now());
        let meta = self.strategy.meta(&input);
        let external_system = meta.external_system().to_string();

        if !external_system.is_empty() {
            if let Err(err) = self.ensure_external_system(tenant, &external_system).await {
                return SyncStatus::failed(format!(
                    "failed to register external system {external_system}: {err}"
                ));
            }
        }

        if meta.skip {
            let reason = if meta.skip_reason.is_empty() {
                "skipped by request".to_string()
            } else {
                meta.skip_reason.clone()
            };
            info!(%kind, external_id = %meta.external.external_id, %reason, "item skipped");
            return SyncStatus::skipped(reason);
        }
        if let Some(reason) = self.strategy.precheck(&input) {
            info!(%kind, external_id = %meta.external.external_id, %reason, "item skipped");
            return SyncStatus::skipped(reason);
        }
        if cancel.is_cancelled() {
            return SyncStatus::failed("cancelled");
        }

        let cx = ItemContext {
            tenant,
            external_system: &external_system,
            finder: &self.finder,
        };
        let refs = match self.strategy.resolve_references(&cx, &input).await {
            Ok(Prepared::Ready(refs)) => refs,
            Ok(Prepared::Skip(reason)) => {
                info!(%kind, external_id = %meta.external.external_id, %reason, "item skipped");
                return SyncStatus::skipped(reason);
            }
            Err(err) => return SyncStatus::failed(format!("failed to resolve references: {err}")),
        };

        let id = match self.upsert(tenant, sync_date, &input, &refs, cancel).await {
            Ok(id) => id,
            Err(status) => return status,
        };

        let links = self.strategy.links(&input, &refs);
        if links.is_empty() {
            return SyncStatus::Success;
        }
        if cancel.is_cancelled() {
            return SyncStatus::failed("cancelled");
        }
        let settings = self.settings.command_retry;
        let results = futures::future::join_all(links.into_iter().map(|link| {
            let cmd = LinkCommand {
                tenant: tenant.to_string(),
                kind,
                id: id.clone(),
                link,
            };
            async move {
                retry_transient("link", settings, cancel, || {
                    self.deps.commands.link(cmd.clone())
                })
                .await
                .map_err(|err| (cmd.link, err))
            }
        }))
        .await;

        let mut failures = results.into_iter().filter_map(Result::err);
        match failures.next() {
            None => SyncStatus::Success,
            Some((link, err)) => {
                let others = failures.count();
                warn!(%kind, %id, ?link, %err, others, "link failed");
                SyncStatus::failed(format!("failed to link {kind} {id}: {err}"))
            }
        }
    }

    /// Critical section: match-or-create, command, visibility wait.
    async fn upsert(
        &self,
        tenant: &str,
        sync_date: DateTime<Utc>,
        input: &S::Input,
        refs: &S::Refs,
        cancel: &CancellationToken,
    ) -> Result<String, SyncStatus> {
        let kind = self.strategy.kind();
        let meta = self.strategy.meta(input);
        let natural_keys = self.strategy.natural_keys(input);

        let _guard = self.create_lock.lock().await;
        if cancel.is_cancelled() {
            return Err(SyncStatus::failed("cancelled"));
        }

        let resolution = self
            .resolver
            .resolve(MatchRequest {
                tenant,
                kind,
                external: &meta.external,
                explicit_id: meta.id.as_deref(),
                natural_keys: &natural_keys,
            })
            .await
            .map_err(|err| SyncStatus::failed(format!("failed to match {kind}: {err}")))?;

        if resolution.is_new() && meta.update_only {
            return Err(SyncStatus::skipped(format!("{kind} not found, update only")));
        }

        let cmd = UpsertCommand {
            tenant: tenant.to_string(),
            kind,
            id: resolution.id().to_string(),
            external: (!meta.external.external_system_id.is_empty()).then(|| {
                ExternalReference {
                    sync_date: Some(sync_date),
                    ..meta.external.clone()
                }
            }),
            app_source: meta.app_source.clone(),
            sync_date,
            natural_keys,
            attributes: self.strategy.attributes(input, refs),
            create: resolution.is_new(),
        };
        let returned = retry_transient("upsert", self.settings.command_retry, cancel, || {
            self.deps.commands.upsert(cmd.clone())
        })
        .await
        .map_err(|err| SyncStatus::failed(format!("failed to upsert {kind}: {err}")))?;
        let id = if returned.is_empty() { cmd.id } else { returned };

        if resolution.is_new() {
            let reads = self.deps.reads.as_ref();
            let id_ref = id.as_str();
            let poll = self.settings.visibility_poll;
            let visible = poll_until(
                move || async move { reads.get_by_id(tenant, kind, id_ref).await.ok().flatten() },
                poll.backoff,
                poll.attempts,
                cancel,
            )
            .await;
            if visible.is_none() {
                warn!(%kind, %id, "created entity not visible yet; continuing");
            }
        }
        Ok(id)
    }

    async fn ensure_external_system(
        &self,
        tenant: &str,
        external_system: &str,
    ) -> Result<(), BackendError> {
        if self.cache.contains(tenant, external_system).await {
            return Ok(());
        }
        self.deps
            .registry
            .merge_external_system(tenant, external_system)
            .await?;
        self.cache.insert(tenant, external_system).await;
        Ok(())
    }
}

/// One orchestrator per entity kind, sharing the external system cache.
#[derive(Clone)]
pub struct SyncService {
    pub contacts: Orchestrator<ContactSync>,
    pub organizations: Orchestrator<OrganizationSync>,
    pub users: Orchestrator<UserSync>,
    pub issues: Orchestrator<IssueSync>,
    pub orders: Orchestrator<OrderSync>,
    pub comments: Orchestrator<CommentSync>,
    pub log_entries: Orchestrator<LogEntrySync>,
    pub interaction_sessions: Orchestrator<InteractionSessionSync>,
    pub interaction_events: Orchestrator<InteractionEventSync>,
    pub emails: EmailSync,
}

impl SyncService {
    pub fn new(cfg: &SyncConfig, deps: SyncDeps) -> Self {
        let cache = ExternalSystemCache::new(Duration::from_secs(cfg.external_system_cache_ttl_secs));
        let settings = |kind| SyncSettings::from_config(cfg, kind);
        let domains = OrganizationSync::new(&cfg.personal_email_domains);
        let contacts = Orchestrator::new(
            ContactSync,
            deps.clone(),
            cache.clone(),
            settings(EntityKind::Contact),
        );
        let organizations = Orchestrator::new(
            domains.clone(),
            deps.clone(),
            cache.clone(),
            settings(EntityKind::Organization),
        );
        let interaction_sessions = Orchestrator::new(
            InteractionSessionSync,
            deps.clone(),
            cache.clone(),
            settings(EntityKind::InteractionSession),
        );
        let interaction_events = Orchestrator::new(
            InteractionEventSync,
            deps.clone(),
            cache.clone(),
            settings(EntityKind::InteractionEvent),
        );
        let emails = EmailSync::new(
            organizations.clone(),
            contacts.clone(),
            interaction_sessions.clone(),
            interaction_events.clone(),
            domains,
        );
        Self {
            contacts,
            organizations,
            users: Orchestrator::new(
                UserSync,
                deps.clone(),
                cache.clone(),
                settings(EntityKind::User),
            ),
            issues: Orchestrator::new(
                IssueSync,
                deps.clone(),
                cache.clone(),
                settings(EntityKind::Issue),
            ),
            orders: Orchestrator::new(
                OrderSync,
                deps.clone(),
                cache.clone(),
                settings(EntityKind::Order),
            ),
            comments: Orchestrator::new(
                CommentSync,
                deps.clone(),
                cache.clone(),
                settings(EntityKind::Comment),
            ),
            log_entries: Orchestrator::new(
                LogEntrySync,
                deps,
                cache,
                settings(EntityKind::LogEntry),
            ),
            interaction_sessions,
            interaction_events,
            emails,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffPolicy;

    fn settings() -> SyncSettings {
        SyncSettings {
            concurrency: 2,
            accepted_external_systems: ["hubspot".to_string()].into_iter().collect(),
            per_item_timeout: Duration::from_secs(2),
            batch_timeout_ceiling: Duration::from_secs(30),
            visibility_poll: RetrySettings {
                attempts: 7,
                backoff: BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(8)),
            },
            command_retry: RetrySettings {
                attempts: 3,
                backoff: BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(4)),
            },
        }
    }

    #[test]
    fn deadline_scales_with_batch_and_caps() {
        let s = settings();
        assert_eq!(s.deadline_for(1), Duration::from_secs(2));
        assert_eq!(s.deadline_for(10), Duration::from_secs(20));
        assert_eq!(s.deadline_for(1_000), Duration::from_secs(30));
    }

    #[test]
    fn settings_from_example_config() {
        let cfg: crate::config::Config =
            serde_yaml::from_str(crate::config::example()).unwrap();
        let s = SyncSettings::from_config(&cfg.sync, EntityKind::Organization);
        assert_eq!(s.concurrency, 2);
        assert!(s.accepted_external_systems.contains("zendesk_support"));
        assert_eq!(s.visibility_poll.attempts, 7);
    }
}
