use super::model::{
    DeliveryState, DirectoryOrganization, DirectoryUser, NewTenantWebhook, ParkedEvent,
    TenantWebhook, WebhookAttempt, WebhookJobRow,
};
use crate::model::webhook::JobStatus;
use crate::model::{DomainEvent, EntityKind, SyncRunSummary, WebhookDeliveryJob};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use sqlx::SqlitePool;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // WAL plus full sync: workflow state must survive a crash.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/`, make sure the parent
/// directory exists and ask sqlx to create the file. In-memory URLs pass
/// through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query_part {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{q}&mode=rwc"),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{expanded_path}?{query}")
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Sync run summaries
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(tenant = %summary.tenant, kind = %summary.entity_kind))]
pub async fn insert_run_summary(pool: &Pool, summary: &SyncRunSummary) -> Result<i64> {
    let reason_counts = serde_json::to_string(&summary.reason_counts)?;
    let res = sqlx::query(
        "INSERT INTO sync_runs (tenant, external_system, app_source, entity_kind, sync_date, start_at, end_at, total, completed, failed, skipped, last_reason, reason_counts) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&summary.tenant)
    .bind(&summary.external_system_id)
    .bind(&summary.app_source)
    .bind(summary.entity_kind.as_str())
    .bind(summary.sync_date)
    .bind(summary.start_at)
    .bind(summary.end_at)
    .bind(summary.total as i64)
    .bind(summary.completed as i64)
    .bind(summary.failed as i64)
    .bind(summary.skipped as i64)
    .bind(&summary.last_reason)
    .bind(reason_counts)
    .execute(pool)
    .await
    .context("failed to persist sync run summary")?;
    Ok(res.last_insert_rowid())
}

/// Most recent summaries first.
#[instrument(skip_all)]
pub async fn list_run_summaries(
    pool: &Pool,
    tenant: &str,
    kind: Option<EntityKind>,
    limit: i64,
) -> Result<Vec<SyncRunSummary>> {
    let rows = sqlx::query(
        "SELECT tenant, external_system, app_source, entity_kind, sync_date, start_at, end_at, total, completed, failed, skipped, last_reason, reason_counts \
         FROM sync_runs WHERE tenant = ? AND (? IS NULL OR entity_kind = ?) ORDER BY id DESC LIMIT ?",
    )
    .bind(tenant)
    .bind(kind.map(|k| k.as_str()))
    .bind(kind.map(|k| k.as_str()))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(summary_from_row).collect()
}

fn summary_from_row(row: &SqliteRow) -> Result<SyncRunSummary> {
    let kind: String = row.get("entity_kind");
    let entity_kind =
        EntityKind::parse(&kind).ok_or_else(|| anyhow!("unknown entity kind {kind}"))?;
    let reason_counts: String = row.get("reason_counts");
    Ok(SyncRunSummary {
        tenant: row.get("tenant"),
        external_system_id: row.get("external_system"),
        app_source: row.get("app_source"),
        entity_kind,
        sync_date: row
            .try_get::<Option<DateTime<Utc>>, _>("sync_date")
            .ok()
            .flatten(),
        start_at: row.get::<DateTime<Utc>, _>("start_at"),
        end_at: row.get::<DateTime<Utc>, _>("end_at"),
        total: row.get::<i64, _>("total") as u32,
        completed: row.get::<i64, _>("completed") as u32,
        failed: row.get::<i64, _>("failed") as u32,
        skipped: row.get::<i64, _>("skipped") as u32,
        last_reason: row.get("last_reason"),
        reason_counts: serde_json::from_str(&reason_counts).unwrap_or_default(),
    })
}

// ---------------------------------------------------------------------------
// Tenant webhook registrations
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(tenant = %hook.tenant, event_type = %hook.event_type))]
pub async fn register_tenant_webhook(pool: &Pool, hook: &NewTenantWebhook) -> Result<i64> {
    let res = sqlx::query(
        "INSERT INTO tenant_webhooks (tenant, event_type, target_url, auth_header_name, auth_header_value, notify_after_attempts, notify_email, notify_name) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&hook.tenant)
    .bind(&hook.event_type)
    .bind(&hook.target_url)
    .bind(&hook.auth_header_name)
    .bind(&hook.auth_header_value)
    .bind(hook.notify_after_attempts as i64)
    .bind(&hook.notify_email)
    .bind(&hook.notify_name)
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

#[instrument(skip_all)]
pub async fn list_tenant_webhooks(
    pool: &Pool,
    tenant: &str,
    event_type: &str,
) -> Result<Vec<TenantWebhook>> {
    let rows = sqlx::query(
        "SELECT id, tenant, event_type, target_url, auth_header_name, auth_header_value, notify_after_attempts, notify_email, notify_name \
         FROM tenant_webhooks WHERE tenant = ? AND event_type = ? ORDER BY id",
    )
    .bind(tenant)
    .bind(event_type)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| TenantWebhook {
            id: row.get("id"),
            tenant: row.get("tenant"),
            event_type: row.get("event_type"),
            target_url: row.get("target_url"),
            auth_header_name: row.get("auth_header_name"),
            auth_header_value: row.get("auth_header_value"),
            notify_after_attempts: row.get::<i64, _>("notify_after_attempts").max(0) as u32,
            notify_email: row
                .try_get::<Option<String>, _>("notify_email")
                .ok()
                .flatten()
                .filter(|s| !s.trim().is_empty()),
            notify_name: row.try_get::<Option<String>, _>("notify_name").ok().flatten(),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Webhook delivery jobs
// ---------------------------------------------------------------------------

/// Insert a job unless one with the same `workflow_id` exists. Returns the
/// job id and whether this call created it.
#[instrument(skip_all, fields(workflow_id = %job.workflow_id))]
pub async fn insert_webhook_job(
    pool: &Pool,
    job: &WebhookDeliveryJob,
    due_at_ms: i64,
) -> Result<(i64, bool)> {
    let body = serde_json::to_string(&job.request_body)?;
    let policy = serde_json::to_string(&job.retry_policy)?;
    let notice = job
        .notification_payload
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let res = sqlx::query(
        "INSERT INTO webhook_jobs (workflow_id, tenant, target_url, auth_header_name, auth_header_value, request_body, retry_policy, notify_after_attempts, notify_on_failure, notification_payload, status, due_at_ms) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?) \
         ON CONFLICT(workflow_id) DO NOTHING",
    )
    .bind(&job.workflow_id)
    .bind(&job.tenant)
    .bind(&job.target_url)
    .bind(&job.auth_header_name)
    .bind(&job.auth_header_value)
    .bind(body)
    .bind(policy)
    .bind(job.notify_after_attempts as i64)
    .bind(job.notify_on_failure)
    .bind(notice)
    .bind(due_at_ms)
    .execute(pool)
    .await
    .context("failed to store webhook job")?;
    if res.rows_affected() == 1 {
        return Ok((res.last_insert_rowid(), true));
    }
    let id: i64 = sqlx::query_scalar("SELECT id FROM webhook_jobs WHERE workflow_id = ?")
        .bind(&job.workflow_id)
        .fetch_one(pool)
        .await?;
    Ok((id, false))
}

const JOB_COLUMNS: &str = "id, workflow_id, tenant, target_url, auth_header_name, auth_header_value, request_body, retry_policy, notify_after_attempts, notify_on_failure, notification_payload, status, attempt, notified, last_error, due_at_ms";

/// Lease the oldest due job that no other engine holds. The lease lasts
/// until `lease_until_ms`; finishing or rescheduling the job releases it.
#[instrument(skip_all)]
pub async fn claim_due_webhook_job(
    pool: &Pool,
    now_ms: i64,
    lease_until_ms: i64,
) -> Result<Option<WebhookJobRow>> {
    let rows = sqlx::query(&format!(
        "UPDATE webhook_jobs SET lease_until_ms = ? \
         WHERE id = (SELECT id FROM webhook_jobs \
                     WHERE status = 'pending' AND due_at_ms <= ? AND (lease_until_ms IS NULL OR lease_until_ms <= ?) \
                     ORDER BY due_at_ms ASC, id ASC LIMIT 1) \
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(lease_until_ms)
    .bind(now_ms)
    .bind(now_ms)
    .fetch_all(pool)
    .await?;
    rows.first().map(job_from_row).transpose()
}

/// Lease one specific job if it is pending, due and not held elsewhere.
#[instrument(skip_all, fields(job_id))]
pub async fn claim_webhook_job(
    pool: &Pool,
    job_id: i64,
    now_ms: i64,
    lease_until_ms: i64,
) -> Result<Option<WebhookJobRow>> {
    let rows = sqlx::query(&format!(
        "UPDATE webhook_jobs SET lease_until_ms = ? \
         WHERE id = ? AND status = 'pending' AND due_at_ms <= ? AND (lease_until_ms IS NULL OR lease_until_ms <= ?) \
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(lease_until_ms)
    .bind(job_id)
    .bind(now_ms)
    .bind(now_ms)
    .fetch_all(pool)
    .await?;
    rows.first().map(job_from_row).transpose()
}

pub async fn get_webhook_job(pool: &Pool, id: i64) -> Result<WebhookJobRow> {
    let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM webhook_jobs WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Err(anyhow!("webhook job {} not found", id));
    };
    job_from_row(&row)
}

pub async fn find_webhook_job(pool: &Pool, workflow_id: &str) -> Result<Option<WebhookJobRow>> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM webhook_jobs WHERE workflow_id = ?"
    ))
    .bind(workflow_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(job_from_row).transpose()
}

fn job_from_row(row: &SqliteRow) -> Result<WebhookJobRow> {
    let id: i64 = row.get("id");
    let status: String = row.get("status");
    let status = JobStatus::parse(&status)
        .ok_or_else(|| anyhow!("webhook job {} has unknown status {}", id, status))?;
    let body: String = row.get("request_body");
    let policy: String = row.get("retry_policy");
    let notice: Option<String> = row
        .try_get::<Option<String>, _>("notification_payload")
        .ok()
        .flatten();
    let job = WebhookDeliveryJob {
        workflow_id: row.get("workflow_id"),
        tenant: row.get("tenant"),
        target_url: row.get("target_url"),
        auth_header_name: row.get("auth_header_name"),
        auth_header_value: row.get("auth_header_value"),
        request_body: serde_json::from_str(&body)
            .with_context(|| format!("webhook job {id} has a malformed body"))?,
        retry_policy: serde_json::from_str(&policy)
            .with_context(|| format!("webhook job {id} has a malformed retry policy"))?,
        notify_after_attempts: row.get::<i64, _>("notify_after_attempts").max(0) as u32,
        notify_on_failure: row.get("notify_on_failure"),
        notification_payload: notice
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .with_context(|| format!("webhook job {id} has a malformed notification payload"))?,
    };
    Ok(WebhookJobRow {
        id,
        job,
        status,
        attempt: row.get::<i64, _>("attempt").max(0) as u32,
        notified: row.get("notified"),
        last_error: row.try_get::<Option<String>, _>("last_error").ok().flatten(),
        due_at_ms: row.get("due_at_ms"),
    })
}

/// Bump the job's attempt counter and append to the attempt history in one
/// transaction. Returns the attempt number just recorded.
#[instrument(skip_all)]
pub async fn record_webhook_attempt(pool: &Pool, job_id: i64, error: Option<&str>) -> Result<u32> {
    let mut tx = pool.begin().await?;
    let counters: Vec<i64> = sqlx::query_scalar(
        "UPDATE webhook_jobs SET attempt = attempt + 1, last_error = COALESCE(?, last_error) WHERE id = ? RETURNING attempt",
    )
    .bind(error)
    .bind(job_id)
    .fetch_all(&mut *tx)
    .await?;
    let Some(attempt) = counters.first().copied() else {
        return Err(anyhow!("webhook job {} not found", job_id));
    };
    sqlx::query(
        "INSERT INTO webhook_attempts (job_id, attempt, succeeded, error) VALUES (?, ?, ?, ?)",
    )
    .bind(job_id)
    .bind(attempt)
    .bind(error.is_none())
    .bind(error)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(attempt.max(0) as u32)
}

pub async fn list_webhook_attempts(pool: &Pool, job_id: i64) -> Result<Vec<WebhookAttempt>> {
    let rows = sqlx::query(
        "SELECT attempt, succeeded, error FROM webhook_attempts WHERE job_id = ? ORDER BY id",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| WebhookAttempt {
            attempt: row.get::<i64, _>("attempt").max(0) as u32,
            succeeded: row.get("succeeded"),
            error: row.try_get::<Option<String>, _>("error").ok().flatten(),
        })
        .collect())
}

#[instrument(skip_all)]
pub async fn schedule_webhook_retry(pool: &Pool, job_id: i64, due_at_ms: i64) -> Result<()> {
    sqlx::query("UPDATE webhook_jobs SET due_at_ms = ?, lease_until_ms = NULL WHERE id = ? AND status = 'pending'")
        .bind(due_at_ms)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn finish_webhook_job(pool: &Pool, job_id: i64, status: JobStatus) -> Result<()> {
    sqlx::query(
        "UPDATE webhook_jobs SET status = ?, lease_until_ms = NULL, finished_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(job_id)
    .execute(pool)
    .await
    .context("failed to finish webhook job")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn mark_webhook_notified(pool: &Pool, job_id: i64) -> Result<()> {
    sqlx::query("UPDATE webhook_jobs SET notified = 1 WHERE id = ?")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_pending_webhook_jobs(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM webhook_jobs WHERE status = 'pending'")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Earliest due time among pending jobs.
pub async fn next_webhook_due_at(pool: &Pool) -> Result<Option<i64>> {
    let due: Option<i64> =
        sqlx::query_scalar("SELECT MIN(due_at_ms) FROM webhook_jobs WHERE status = 'pending'")
            .fetch_one(pool)
            .await?;
    Ok(due)
}

// ---------------------------------------------------------------------------
// Event log and per-group deliveries
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(event_type = %event_type))]
pub async fn append_event(
    pool: &Pool,
    aggregate_id: &str,
    tenant: &str,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<i64> {
    let res = sqlx::query(
        "INSERT INTO events (aggregate_id, tenant, event_type, payload, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(aggregate_id)
    .bind(tenant)
    .bind(event_type)
    .bind(serde_json::to_string(payload)?)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

pub async fn get_event(pool: &Pool, position: i64) -> Result<Option<DomainEvent>> {
    let row = sqlx::query(
        "SELECT position, aggregate_id, tenant, event_type, payload, created_at FROM events WHERE position = ?",
    )
    .bind(position)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(event_from_row).transpose()
}

fn event_from_row(row: &SqliteRow) -> Result<DomainEvent> {
    let position: i64 = row.get("position");
    let payload: String = row.get("payload");
    Ok(DomainEvent {
        position,
        aggregate_id: row.get("aggregate_id"),
        tenant: row.get("tenant"),
        event_type: row.get("event_type"),
        payload: serde_json::from_str(&payload)
            .with_context(|| format!("event {position} has a malformed payload"))?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").ok(),
    })
}

/// Atomically claim the oldest event the group has not seen yet for
/// `worker_id`. Competing workers never claim the same position.
#[instrument(skip_all, fields(group = %group, worker_id))]
pub async fn claim_next_event(
    pool: &Pool,
    group: &str,
    worker_id: usize,
) -> Result<Option<DomainEvent>> {
    let claimed: Vec<i64> = sqlx::query_scalar(
        "INSERT OR IGNORE INTO event_deliveries (group_name, position, worker_id, state) \
         SELECT ?, e.position, ?, 'inflight' FROM events e \
         WHERE NOT EXISTS (SELECT 1 FROM event_deliveries d WHERE d.group_name = ? AND d.position = e.position) \
         ORDER BY e.position ASC LIMIT 1 \
         RETURNING position",
    )
    .bind(group)
    .bind(worker_id as i64)
    .bind(group)
    .fetch_all(pool)
    .await?;
    match claimed.first() {
        Some(position) => get_event(pool, *position).await,
        None => Ok(None),
    }
}

async fn set_delivery_state(
    pool: &Pool,
    group: &str,
    position: i64,
    state: DeliveryState,
    reason: Option<&str>,
) -> Result<()> {
    let res = sqlx::query(
        "UPDATE event_deliveries SET state = ?, reason = ?, updated_at = CURRENT_TIMESTAMP WHERE group_name = ? AND position = ?",
    )
    .bind(state.as_str())
    .bind(reason)
    .bind(group)
    .bind(position)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!(
            "event {} was not claimed by group {}",
            position,
            group
        ));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn ack_event(pool: &Pool, group: &str, position: i64) -> Result<()> {
    set_delivery_state(pool, group, position, DeliveryState::Acked, None).await
}

#[instrument(skip_all)]
pub async fn park_event(pool: &Pool, group: &str, position: i64, reason: &str) -> Result<()> {
    set_delivery_state(pool, group, position, DeliveryState::Parked, Some(reason)).await
}

pub async fn delivery_state(
    pool: &Pool,
    group: &str,
    position: i64,
) -> Result<Option<DeliveryState>> {
    let state: Option<String> = sqlx::query_scalar(
        "SELECT state FROM event_deliveries WHERE group_name = ? AND position = ?",
    )
    .bind(group)
    .bind(position)
    .fetch_optional(pool)
    .await?;
    Ok(state.and_then(|s| DeliveryState::parse(&s)))
}

/// Release claims left behind by a crashed worker so they are redelivered.
#[instrument(skip_all)]
pub async fn release_inflight_events(pool: &Pool, group: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM event_deliveries WHERE group_name = ? AND state = 'inflight'")
        .bind(group)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn list_parked_events(pool: &Pool, group: &str) -> Result<Vec<ParkedEvent>> {
    let rows = sqlx::query(
        "SELECT d.position, d.reason, e.event_type, e.aggregate_id \
         FROM event_deliveries d JOIN events e ON e.position = d.position \
         WHERE d.group_name = ? AND d.state = 'parked' ORDER BY d.position",
    )
    .bind(group)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| ParkedEvent {
            position: row.get("position"),
            event_type: row.get("event_type"),
            aggregate_id: row.get("aggregate_id"),
            reason: row
                .try_get::<Option<String>, _>("reason")
                .ok()
                .flatten()
                .unwrap_or_default(),
        })
        .collect())
}

/// Put parked events back into the stream of `group`. With a position only
/// that event is re-queued.
#[instrument(skip_all)]
pub async fn requeue_parked_events(
    pool: &Pool,
    group: &str,
    position: Option<i64>,
) -> Result<u64> {
    let res = sqlx::query(
        "DELETE FROM event_deliveries WHERE group_name = ? AND state = 'parked' AND (? IS NULL OR position = ?)",
    )
    .bind(group)
    .bind(position)
    .bind(position)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

// ---------------------------------------------------------------------------
// Directory projection
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn upsert_directory_user(pool: &Pool, user: &DirectoryUser) -> Result<()> {
    sqlx::query(
        "INSERT INTO directory_users (tenant, id, first_name, last_name, email) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(tenant, id) DO UPDATE SET first_name = excluded.first_name, last_name = excluded.last_name, email = excluded.email",
    )
    .bind(&user.tenant)
    .bind(&user.id)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.email)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_directory_user(
    pool: &Pool,
    tenant: &str,
    id: &str,
) -> Result<Option<DirectoryUser>> {
    let row = sqlx::query(
        "SELECT tenant, id, first_name, last_name, email FROM directory_users WHERE tenant = ? AND id = ?",
    )
    .bind(tenant)
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| DirectoryUser {
        tenant: row.get("tenant"),
        id: row.get("id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
    }))
}

#[instrument(skip_all)]
pub async fn upsert_directory_organization(
    pool: &Pool,
    org: &DirectoryOrganization,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO directory_organizations (tenant, id, name, owner_id) VALUES (?, ?, ?, ?) \
         ON CONFLICT(tenant, id) DO UPDATE SET name = excluded.name, owner_id = COALESCE(excluded.owner_id, directory_organizations.owner_id)",
    )
    .bind(&org.tenant)
    .bind(&org.id)
    .bind(&org.name)
    .bind(&org.owner_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_directory_organization(
    pool: &Pool,
    tenant: &str,
    id: &str,
) -> Result<Option<DirectoryOrganization>> {
    let row = sqlx::query(
        "SELECT tenant, id, name, owner_id FROM directory_organizations WHERE tenant = ? AND id = ?",
    )
    .bind(tenant)
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| DirectoryOrganization {
        tenant: row.get("tenant"),
        id: row.get("id"),
        name: row.get("name"),
        owner_id: row.try_get::<Option<String>, _>("owner_id").ok().flatten(),
    }))
}
