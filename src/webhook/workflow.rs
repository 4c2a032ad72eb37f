//! Durable webhook delivery.
//!
//! Every job is a row in `webhook_jobs`; its attempt counter, due time and
//! notification flag live there too, so a restarted process resumes a
//! workflow where it stopped. An engine leases a job before attempting it, so
//! several engines can share one database. Each step performs exactly one
//! HTTP attempt and then either completes the job, schedules the next attempt
//! according to the job's [`RetryPolicy`], or gives up once
//! `maximum_attempts` is reached.
use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::WebhookSender;
use crate::db::{self, Pool, WebhookJobRow};
use crate::model::webhook::JobStatus;
use crate::model::{RetryPolicy, WebhookDeliveryJob};
use crate::notify::{
    Channel, ContentProvider, Notification, NotificationSender, WEBHOOK_DELIVERY_FAILED_TEMPLATE,
};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

const DEFAULT_LEASE: Duration = Duration::from_secs(60);
const DEFAULT_MAX_IN_FLIGHT: usize = 4;
/// Pause before re-checking a job another engine holds.
const LEASE_RECHECK: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct WebhookEngine {
    pool: Pool,
    sender: Arc<dyn WebhookSender>,
    notifier: Arc<dyn NotificationSender>,
    templates: Arc<dyn ContentProvider>,
    default_policy: RetryPolicy,
    lease: Duration,
    max_in_flight: usize,
}

impl WebhookEngine {
    pub fn new(
        pool: Pool,
        sender: Arc<dyn WebhookSender>,
        notifier: Arc<dyn NotificationSender>,
        templates: Arc<dyn ContentProvider>,
        default_policy: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            sender,
            notifier,
            templates,
            default_policy,
            lease: DEFAULT_LEASE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// How long a claimed job stays reserved for this engine. Must outlast
    /// one delivery plus one failure notification.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Upper bound on concurrent deliveries in [`WebhookEngine::run`].
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn default_policy(&self) -> RetryPolicy {
        self.default_policy
    }

    /// Start a workflow. Dispatching an existing `workflow_id` again returns
    /// the existing job instead of creating a second one.
    #[instrument(skip_all, fields(workflow_id = %job.workflow_id, tenant = %job.tenant))]
    pub async fn dispatch(&self, job: &WebhookDeliveryJob) -> Result<i64> {
        let (id, created) = db::insert_webhook_job(&self.pool, job, now_ms()).await?;
        if created {
            info!(job_id = id, url = %job.target_url, "webhook workflow started");
        } else {
            info!(job_id = id, "webhook workflow already exists; resuming");
        }
        Ok(id)
    }

    fn lease_until(&self, now: i64) -> i64 {
        now.saturating_add(self.lease.as_millis() as i64)
    }

    /// Run one attempt of the oldest due job no other engine holds. Returns
    /// false when nothing was claimable at `now`.
    #[instrument(skip_all)]
    pub async fn process_next(&self, now: i64) -> Result<bool> {
        let Some(row) = db::claim_due_webhook_job(&self.pool, now, self.lease_until(now)).await?
        else {
            return Ok(false);
        };
        self.attempt(&row, now).await?;
        Ok(true)
    }

    /// Drive one job to a terminal status in this task, sleeping between
    /// attempts. Resumes from the stored attempt counter.
    #[instrument(skip(self, cancel))]
    pub async fn run_to_completion(
        &self,
        job_id: i64,
        cancel: &CancellationToken,
    ) -> Result<JobStatus> {
        // Local clock: advanced by what we slept, never behind the wall clock.
        let mut now = now_ms();
        loop {
            let row = db::get_webhook_job(&self.pool, job_id).await?;
            if row.status != JobStatus::Pending {
                return Ok(row.status);
            }
            let wait = row.due_at_ms.saturating_sub(now).max(0) as u64;
            if wait > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(JobStatus::Pending),
                    _ = tokio::time::sleep(Duration::from_millis(wait)) => {}
                }
            }
            now = now.max(row.due_at_ms);
            match db::claim_webhook_job(&self.pool, job_id, now, self.lease_until(now)).await? {
                Some(claimed) => self.attempt(&claimed, now).await?,
                None => {
                    // Held by another engine; look again once it may have moved on.
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(JobStatus::Pending),
                        _ = tokio::time::sleep(LEASE_RECHECK) => {}
                    }
                }
            }
            now = now.max(now_ms());
        }
    }

    /// Poll for due jobs until cancelled, delivering up to `max_in_flight`
    /// of them at once so one slow endpoint does not hold up the rest.
    /// Attempts already started are finished before returning.
    pub async fn run(&self, cancel: &CancellationToken, idle: Duration) {
        let mut in_flight: JoinSet<Result<()>> = JoinSet::new();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            while in_flight.len() < self.max_in_flight {
                let now = now_ms();
                match db::claim_due_webhook_job(&self.pool, now, self.lease_until(now)).await {
                    Ok(Some(row)) => {
                        let engine = self.clone();
                        in_flight.spawn(async move { engine.attempt(&row, now).await });
                    }
                    Ok(None) => break,
                    Err(err) => {
                        error!(?err, "webhook engine failed to claim a job");
                        break;
                    }
                }
            }
            let saturated = in_flight.len() >= self.max_in_flight;
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_attempt_outcome(joined);
                }
                _ = tokio::time::sleep(idle), if !saturated => {}
            }
        }
        while let Some(joined) = in_flight.join_next().await {
            log_attempt_outcome(joined);
        }
        info!("webhook engine stopped");
    }

    /// One delivery attempt of a job this engine has leased.
    async fn attempt(&self, row: &WebhookJobRow, now: i64) -> Result<()> {
        let job = &row.job;
        match self.sender.deliver(job).await {
            Ok(()) => {
                let attempt = db::record_webhook_attempt(&self.pool, row.id, None).await?;
                db::finish_webhook_job(&self.pool, row.id, JobStatus::Delivered).await?;
                info!(job_id = row.id, workflow_id = %job.workflow_id, attempt, "webhook delivered");
            }
            Err(err) => {
                let reason = err.to_string();
                let attempt = db::record_webhook_attempt(&self.pool, row.id, Some(&reason)).await?;
                if should_notify(row, attempt) {
                    self.notify_failure(row, attempt, &reason).await;
                    db::mark_webhook_notified(&self.pool, row.id).await?;
                }
                if job.retry_policy.exhausted(attempt) {
                    db::finish_webhook_job(&self.pool, row.id, JobStatus::Failed).await?;
                    warn!(job_id = row.id, workflow_id = %job.workflow_id, attempt, %reason, "webhook delivery gave up");
                } else {
                    let delay = job.retry_policy.delay_after(attempt);
                    let due = now.saturating_add(delay.as_millis() as i64);
                    db::schedule_webhook_retry(&self.pool, row.id, due).await?;
                    warn!(job_id = row.id, attempt, %reason, ?delay, "webhook delivery failed; retrying");
                }
            }
        }
        Ok(())
    }

    /// Best effort: a failure here never changes the delivery outcome.
    async fn notify_failure(&self, row: &WebhookJobRow, attempts: u32, last_error: &str) {
        let job = &row.job;
        let Some(notice) = job.notification_payload.as_ref() else {
            return;
        };
        let mut values = BTreeMap::new();
        values.insert("recipient_name".to_string(), notice.recipient_name.clone());
        values.insert("event_type".to_string(), notice.event_type.clone());
        values.insert("target_url".to_string(), job.target_url.clone());
        values.insert("attempts".to_string(), attempts.to_string());
        values.insert("last_error".to_string(), last_error.to_string());
        let content = match self.templates.render(WEBHOOK_DELIVERY_FAILED_TEMPLATE, &values) {
            Ok(content) => content,
            Err(err) => {
                warn!(%err, job_id = row.id, "cannot render webhook failure notification");
                return;
            }
        };
        let notification = Notification {
            tenant: job.tenant.clone(),
            channel: Channel::Email,
            template: WEBHOOK_DELIVERY_FAILED_TEMPLATE.to_string(),
            recipient_email: notice.recipient_email.clone(),
            recipient_name: notice.recipient_name.clone(),
            recipient_user_id: None,
            content,
        };
        match self.notifier.send(&notification).await {
            Ok(()) => info!(job_id = row.id, attempts, "webhook failure notification sent"),
            Err(err) => warn!(?err, job_id = row.id, "webhook failure notification not sent"),
        }
    }
}

fn log_attempt_outcome(joined: Result<Result<()>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(?err, "webhook engine step failed"),
        Err(err) => error!(?err, "webhook attempt task panicked"),
    }
}

fn should_notify(row: &WebhookJobRow, attempt: u32) -> bool {
    let job = &row.job;
    job.notify_on_failure
        && !row.notified
        && job.notification_payload.is_some()
        && job.notify_after_attempts > 0
        && attempt >= job.notify_after_attempts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FailureNotice;
    use serde_json::json;

    fn row(attempt: u32, notified: bool) -> WebhookJobRow {
        WebhookJobRow {
            id: 1,
            job: WebhookDeliveryJob {
                workflow_id: "wf".into(),
                tenant: "t1".into(),
                target_url: "http://x".into(),
                auth_header_name: String::new(),
                auth_header_value: String::new(),
                request_body: json!({}),
                retry_policy: RetryPolicy::default(),
                notify_after_attempts: 2,
                notify_on_failure: true,
                notification_payload: Some(FailureNotice {
                    recipient_email: "ops@t1.io".into(),
                    recipient_name: "Ops".into(),
                    event_type: "invoice.finalized".into(),
                }),
            },
            status: JobStatus::Pending,
            attempt,
            notified,
            last_error: None,
            due_at_ms: 0,
        }
    }

    #[test]
    fn notification_threshold() {
        assert!(!should_notify(&row(0, false), 1));
        assert!(should_notify(&row(1, false), 2));
        assert!(should_notify(&row(2, false), 3));
        assert!(!should_notify(&row(2, true), 3));

        let mut r = row(1, false);
        r.job.notify_after_attempts = 0;
        assert!(!should_notify(&r, 2));
        r.job.notify_after_attempts = 2;
        r.job.notify_on_failure = false;
        assert!(!should_notify(&r, 2));
    }
}
