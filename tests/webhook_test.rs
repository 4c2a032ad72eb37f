use anyhow::{anyhow, Result};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use syncrelay::config::Webhooks;
use syncrelay::db;
use syncrelay::error::DeliveryError;
use syncrelay::model::webhook::JobStatus;
use syncrelay::model::{FailureNotice, RetryPolicy, WebhookDeliveryJob};
use syncrelay::notify::{
    Channel, Notification, NotificationSender, TemplateCatalog, WEBHOOK_DELIVERY_FAILED_TEMPLATE,
};
use syncrelay::webhook::{HttpWebhookSender, WebhookEngine, WebhookSender};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[derive(Clone, Default)]
struct ScriptedSender {
    responses: Arc<Mutex<VecDeque<Result<(), DeliveryError>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSender {
    fn with_statuses(statuses: &[u16]) -> Self {
        let responses = statuses
            .iter()
            .map(|s| match s {
                200 => Ok(()),
                other => Err(DeliveryError::Status(*other)),
            })
            .collect();
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Default::default()
        }
    }

    async fn calls(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait::async_trait]
impl WebhookSender for ScriptedSender {
    async fn deliver(&self, job: &WebhookDeliveryJob) -> Result<(), DeliveryError> {
        self.calls.lock().await.push(job.workflow_id.clone());
        self.responses.lock().await.pop_front().unwrap_or(Ok(()))
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    fail: bool,
}

impl RecordingNotifier {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().await.push(notification.clone());
        if self.fail {
            return Err(anyhow!("mail provider unavailable"));
        }
        Ok(())
    }
}

fn engine(pool: &db::Pool, sender: &ScriptedSender, notifier: &RecordingNotifier) -> WebhookEngine {
    WebhookEngine::new(
        pool.clone(),
        Arc::new(sender.clone()),
        Arc::new(notifier.clone()),
        Arc::new(TemplateCatalog::builtin()),
        RetryPolicy::default(),
    )
}

fn job(workflow_id: &str, notify_after_attempts: u32) -> WebhookDeliveryJob {
    WebhookDeliveryJob {
        workflow_id: workflow_id.into(),
        tenant: "t1".into(),
        target_url: "https://hooks.tenant.io/invoices".into(),
        auth_header_name: "X-Tenant-Key".into(),
        auth_header_value: "s3cret".into(),
        request_body: json!({"event": "invoice.finalized", "data": {"id": "inv-1"}}),
        retry_policy: RetryPolicy::default(),
        notify_after_attempts,
        notify_on_failure: true,
        notification_payload: Some(FailureNotice {
            recipient_email: "billing@tenant.io".into(),
            recipient_name: "Billing".into(),
            event_type: "invoice.finalized".into(),
        }),
    }
}

#[tokio::test]
async fn failing_endpoint_recovers_within_default_policy() {
    let pool = setup_pool().await;
    let sender = ScriptedSender::with_statuses(&[500, 500, 200]);
    let notifier = RecordingNotifier::default();
    let engine = engine(&pool, &sender, &notifier);

    let id = engine.dispatch(&job("wf-1", 5)).await.unwrap();
    let t0 = db::get_webhook_job(&pool, id).await.unwrap().due_at_ms;

    assert!(engine.process_next(t0).await.unwrap());
    let row = db::get_webhook_job(&pool, id).await.unwrap();
    assert_eq!((row.status, row.attempt), (JobStatus::Pending, 1));
    assert_eq!(row.due_at_ms, t0 + 1_000);
    assert_eq!(row.last_error.as_deref(), Some("endpoint answered with status 500"));

    // Backoff is honoured: nothing is due before the delay elapsed.
    assert!(!engine.process_next(t0 + 999).await.unwrap());
    assert!(engine.process_next(t0 + 1_000).await.unwrap());
    let row = db::get_webhook_job(&pool, id).await.unwrap();
    assert_eq!(row.due_at_ms, t0 + 3_000);

    assert!(!engine.process_next(t0 + 2_999).await.unwrap());
    assert!(engine.process_next(t0 + 3_000).await.unwrap());

    let row = db::get_webhook_job(&pool, id).await.unwrap();
    assert_eq!((row.status, row.attempt), (JobStatus::Delivered, 3));
    assert!(!row.notified);
    let attempts = db::list_webhook_attempts(&pool, id).await.unwrap();
    assert_eq!(
        attempts.iter().map(|a| a.succeeded).collect::<Vec<_>>(),
        vec![false, false, true]
    );
    assert_eq!(sender.calls().await, 3);
    assert!(notifier.sent().await.is_empty());
    assert!(!engine.process_next(t0 + 1_000_000).await.unwrap());
    assert_eq!(db::count_pending_webhook_jobs(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn exhausted_workflow_fails_and_notifies_once() {
    let pool = setup_pool().await;
    let sender = ScriptedSender::with_statuses(&[500, 503, 502]);
    let notifier = RecordingNotifier::default();
    let engine = engine(&pool, &sender, &notifier);

    let id = engine.dispatch(&job("wf-2", 2)).await.unwrap();
    let mut now = db::get_webhook_job(&pool, id).await.unwrap().due_at_ms;
    for _ in 0..3 {
        assert!(engine.process_next(now).await.unwrap());
        now += 10_000;
    }

    let row = db::get_webhook_job(&pool, id).await.unwrap();
    assert_eq!((row.status, row.attempt), (JobStatus::Failed, 3));
    assert!(row.notified);
    assert_eq!(row.last_error.as_deref(), Some("endpoint answered with status 502"));

    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 1);
    let n = &sent[0];
    assert_eq!(n.channel, Channel::Email);
    assert_eq!(n.template, WEBHOOK_DELIVERY_FAILED_TEMPLATE);
    assert_eq!(n.recipient_email, "billing@tenant.io");
    assert_eq!(n.content.subject, "Webhook delivery failing for invoice.finalized");
    assert!(n.content.body.contains("has failed 2 times"));
    assert!(n.content.body.contains("https://hooks.tenant.io/invoices"));

    // Terminal jobs are never picked up again.
    assert!(!engine.process_next(now + 1_000_000).await.unwrap());
    assert_eq!(sender.calls().await, 3);
}

#[tokio::test]
async fn notification_failure_does_not_change_the_outcome() {
    let pool = setup_pool().await;
    let sender = ScriptedSender::with_statuses(&[500, 500, 500]);
    let notifier = RecordingNotifier::failing();
    let engine = engine(&pool, &sender, &notifier);

    let id = engine.dispatch(&job("wf-3", 1)).await.unwrap();
    let mut now = db::get_webhook_job(&pool, id).await.unwrap().due_at_ms;
    for _ in 0..3 {
        assert!(engine.process_next(now).await.unwrap());
        now += 10_000;
    }
    let row = db::get_webhook_job(&pool, id).await.unwrap();
    assert_eq!(row.status, JobStatus::Failed);
    assert!(row.notified);
    assert_eq!(notifier.sent().await.len(), 1);
}

#[tokio::test]
async fn notification_needs_opt_in_and_payload() {
    let pool = setup_pool().await;
    let sender = ScriptedSender::with_statuses(&[500, 500, 500, 500, 500, 500]);
    let notifier = RecordingNotifier::default();
    let engine = engine(&pool, &sender, &notifier);

    let mut silent = job("wf-silent", 1);
    silent.notify_on_failure = false;
    let mut anonymous = job("wf-anonymous", 1);
    anonymous.notification_payload = None;
    engine.dispatch(&silent).await.unwrap();
    engine.dispatch(&anonymous).await.unwrap();

    let mut now = syncrelay::webhook::workflow::now_ms();
    while db::count_pending_webhook_jobs(&pool).await.unwrap() > 0 {
        engine.process_next(now).await.unwrap();
        now += 10_000;
    }
    assert!(notifier.sent().await.is_empty());
}

#[tokio::test]
async fn redispatch_resumes_the_same_workflow() {
    let pool = setup_pool().await;
    let sender = ScriptedSender::with_statuses(&[500]);
    let notifier = RecordingNotifier::default();
    let engine = engine(&pool, &sender, &notifier);

    let first = engine.dispatch(&job("wf-4", 0)).await.unwrap();
    let now = db::get_webhook_job(&pool, first).await.unwrap().due_at_ms;
    assert!(engine.process_next(now).await.unwrap());

    let second = engine.dispatch(&job("wf-4", 0)).await.unwrap();
    assert_eq!(first, second);
    let row = db::get_webhook_job(&pool, first).await.unwrap();
    assert_eq!(row.attempt, 1);
    assert_eq!(db::count_pending_webhook_jobs(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn run_to_completion_sleeps_between_attempts() {
    let pool = setup_pool().await;
    let sender = ScriptedSender::with_statuses(&[500, 500, 200]);
    let notifier = RecordingNotifier::default();
    let engine = engine(&pool, &sender, &notifier);

    let mut fast = job("wf-5", 0);
    fast.retry_policy = RetryPolicy {
        initial_interval_ms: 10,
        backoff_coefficient: 2.0,
        maximum_interval_ms: 20,
        maximum_attempts: 4,
    };
    let id = engine.dispatch(&fast).await.unwrap();
    let status = engine
        .run_to_completion(id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, JobStatus::Delivered);
    assert_eq!(sender.calls().await, 3);
}

#[tokio::test]
async fn run_to_completion_stops_on_cancel() {
    let pool = setup_pool().await;
    let sender = ScriptedSender::with_statuses(&[500]);
    let notifier = RecordingNotifier::default();
    let engine = engine(&pool, &sender, &notifier);

    let mut slow = job("wf-6", 0);
    slow.retry_policy.initial_interval_ms = 60_000;
    let id = engine.dispatch(&slow).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let status = engine.run_to_completion(id, &cancel).await.unwrap();
    assert_eq!(status, JobStatus::Pending);
    assert_eq!(db::get_webhook_job(&pool, id).await.unwrap().attempt, 1);
}

fn http_sender() -> HttpWebhookSender {
    HttpWebhookSender::new(&Webhooks {
        default_retry_policy: RetryPolicy::default(),
        request_timeout_ms: 2_000,
        user_agent: "syncrelay-test".into(),
        lease_ms: 60_000,
        max_in_flight: 4,
    })
    .unwrap()
}

#[tokio::test]
async fn http_sender_posts_json_with_auth_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/invoices"))
        .and(header("x-tenant-key", "s3cret"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"event": "invoice.finalized", "data": {"id": "inv-1"}})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut j = job("wf-http", 0);
    j.target_url = format!("{}/invoices", server.uri());
    http_sender().deliver(&j).await.unwrap();
}

#[tokio::test]
async fn http_sender_only_accepts_200() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let mut j = job("wf-http", 0);
    j.target_url = format!("{}/invoices", server.uri());
    assert_eq!(
        http_sender().deliver(&j).await,
        Err(DeliveryError::Status(201))
    );
}

#[tokio::test]
async fn http_sender_reports_transport_errors() {
    let mut j = job("wf-http", 0);
    j.target_url = "http://127.0.0.1:9/invoices".into();
    assert!(matches!(
        http_sender().deliver(&j).await,
        Err(DeliveryError::Transport(_))
    ));
}

#[tokio::test]
async fn engine_retries_real_endpoint_until_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let pool = setup_pool().await;
    let notifier = RecordingNotifier::default();
    let engine = WebhookEngine::new(
        pool.clone(),
        Arc::new(http_sender()),
        Arc::new(notifier.clone()),
        Arc::new(TemplateCatalog::builtin()),
        RetryPolicy::default(),
    );
    let mut j = job("wf-real", 5);
    j.target_url = format!("{}/invoices", server.uri());
    let id = engine.dispatch(&j).await.unwrap();

    let mut now = db::get_webhook_job(&pool, id).await.unwrap().due_at_ms;
    for _ in 0..3 {
        assert!(engine.process_next(now).await.unwrap());
        now += 10_000;
    }
    let row = db::get_webhook_job(&pool, id).await.unwrap();
    assert_eq!((row.status, row.attempt), (JobStatus::Delivered, 3));
    assert!(notifier.sent().await.is_empty());
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

async fn file_pool(dir: &tempfile::TempDir) -> db::Pool {
    let url = format!("sqlite://{}/relay.db", dir.path().display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

fn fast_policy(maximum_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        initial_interval_ms: 5,
        backoff_coefficient: 2.0,
        maximum_interval_ms: 10,
        maximum_attempts,
    }
}

#[tokio::test]
async fn dispatched_job_is_committed_on_a_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(&dir).await;
    let sender = ScriptedSender::default();
    let notifier = RecordingNotifier::default();
    let engine = engine(&pool, &sender, &notifier);

    for i in 0..20 {
        let mut j = job(&format!("wf-file-{i}"), 0);
        j.retry_policy = fast_policy(3);
        let id = engine.dispatch(&j).await.unwrap();
        let status = engine
            .run_to_completion(id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Delivered);
    }
    assert_eq!(sender.calls().await, 20);
}

/// Answers every POST with `status` after `delay`, counting calls per workflow.
#[derive(Clone)]
struct SlowSender {
    status: u16,
    delay: Duration,
    calls: Arc<Mutex<Vec<String>>>,
}

impl SlowSender {
    fn new(status: u16, delay: Duration) -> Self {
        Self {
            status,
            delay,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait::async_trait]
impl WebhookSender for SlowSender {
    async fn deliver(&self, job: &WebhookDeliveryJob) -> Result<(), DeliveryError> {
        self.calls.lock().await.push(job.workflow_id.clone());
        tokio::time::sleep(self.delay).await;
        match self.status {
            200 => Ok(()),
            other => Err(DeliveryError::Status(other)),
        }
    }
}

fn engine_with(pool: &db::Pool, sender: Arc<dyn WebhookSender>) -> WebhookEngine {
    WebhookEngine::new(
        pool.clone(),
        sender,
        Arc::new(RecordingNotifier::default()),
        Arc::new(TemplateCatalog::builtin()),
        RetryPolicy::default(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engines_sharing_a_database_attempt_once() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(&dir).await;
    let sender = SlowSender::new(500, Duration::from_millis(100));
    let first = engine_with(&pool, Arc::new(sender.clone()));
    let second = engine_with(&pool, Arc::new(sender.clone()));

    let mut j = job("wf-shared", 0);
    j.retry_policy = fast_policy(1);
    let id = first.dispatch(&j).await.unwrap();
    let now = syncrelay::webhook::workflow::now_ms();

    let (a, b) = tokio::join!(first.process_next(now), second.process_next(now));
    assert_eq!(
        [a.unwrap(), b.unwrap()].iter().filter(|claimed| **claimed).count(),
        1
    );

    let row = db::get_webhook_job(&pool, id).await.unwrap();
    assert_eq!((row.status, row.attempt), (JobStatus::Failed, 1));
    assert_eq!(db::list_webhook_attempts(&pool, id).await.unwrap().len(), 1);
    assert_eq!(sender.calls.lock().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engines_draining_together_deliver_each_job_once() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(&dir).await;
    let sender = SlowSender::new(200, Duration::from_millis(5));
    let first = engine_with(&pool, Arc::new(sender.clone()));
    let second = engine_with(&pool, Arc::new(sender.clone()));

    for i in 0..10 {
        first.dispatch(&job(&format!("wf-drain-{i}"), 0)).await.unwrap();
    }
    let drain = |engine: WebhookEngine| async move {
        let now = syncrelay::webhook::workflow::now_ms() + 1_000;
        while engine.process_next(now).await.unwrap() {}
    };
    tokio::join!(drain(first), drain(second));

    assert_eq!(db::count_pending_webhook_jobs(&pool).await.unwrap(), 0);
    let mut calls = sender.calls.lock().await.clone();
    calls.sort();
    calls.dedup();
    assert_eq!(calls.len(), 10);
    assert_eq!(sender.calls.lock().await.len(), 10);
}

/// Holds deliveries to `slow_url` until the test releases them.
#[derive(Clone)]
struct GatedSender {
    slow_url: String,
    gate: Arc<tokio::sync::Semaphore>,
}

#[async_trait::async_trait]
impl WebhookSender for GatedSender {
    async fn deliver(&self, job: &WebhookDeliveryJob) -> Result<(), DeliveryError> {
        if job.target_url == self.slow_url {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn hanging_endpoint_does_not_hold_up_other_deliveries() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(&dir).await;
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let sender = GatedSender {
        slow_url: "https://slow.tenant.io/hook".into(),
        gate: gate.clone(),
    };
    let engine = engine_with(&pool, Arc::new(sender)).with_max_in_flight(4);

    let mut slow = job("wf-slow", 0);
    slow.target_url = "https://slow.tenant.io/hook".into();
    let slow_id = engine.dispatch(&slow).await.unwrap();
    let mut fast_ids = Vec::new();
    for i in 0..3 {
        fast_ids.push(engine.dispatch(&job(&format!("wf-fast-{i}"), 0)).await.unwrap());
    }

    let cancel = CancellationToken::new();
    let runner = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(&cancel, Duration::from_millis(10)).await })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let mut delivered = 0;
        for id in &fast_ids {
            if db::get_webhook_job(&pool, *id).await.unwrap().status == JobStatus::Delivered {
                delivered += 1;
            }
        }
        if delivered == fast_ids.len() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "fast jobs not delivered");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(
        db::get_webhook_job(&pool, slow_id).await.unwrap().status,
        JobStatus::Pending
    );

    // Shutdown waits for the attempt already in flight.
    cancel.cancel();
    gate.add_permits(1);
    runner.await.unwrap();
    assert_eq!(
        db::get_webhook_job(&pool, slow_id).await.unwrap().status,
        JobStatus::Delivered
    );
}
