use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use syncrelay::config::Subscription;
use syncrelay::db::{self, DirectoryOrganization, DirectoryUser, NewTenantWebhook};
use syncrelay::error::DeliveryError;
use syncrelay::events::handlers::workflow_id;
use syncrelay::events::{
    self, ConsumerGroup, Disposition, DirectoryProjection, EventHandler, InvoiceWebhookHandler,
    OwnerUpdatedHandler, SqliteEventStore,
};
use syncrelay::model::{DomainEvent, RetryPolicy, WebhookDeliveryJob};
use syncrelay::notify::{Channel, Notification, NotificationSender, TemplateCatalog};
use syncrelay::webhook::{WebhookEngine, WebhookSender};
use tokio::sync::Mutex;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

struct AcceptingSender;

#[async_trait::async_trait]
impl WebhookSender for AcceptingSender {
    async fn deliver(&self, _job: &WebhookDeliveryJob) -> Result<(), DeliveryError> {
        Ok(())
    }
}

fn engine(pool: &db::Pool) -> WebhookEngine {
    WebhookEngine::new(
        pool.clone(),
        Arc::new(AcceptingSender),
        Arc::new(RecordingNotifier::default()),
        Arc::new(TemplateCatalog::builtin()),
        RetryPolicy::default(),
    )
}

fn event(position: i64, event_type: &str, payload: serde_json::Value) -> DomainEvent {
    DomainEvent {
        position,
        aggregate_id: "organization-o1".into(),
        tenant: "t1".into(),
        event_type: event_type.into(),
        payload,
        created_at: None,
    }
}

async fn seed_directory(pool: &db::Pool) {
    for (id, first, last, email) in [
        ("u-ada", "Ada", "Lovelace", "ada@acme.com"),
        ("u-grace", "Grace", "Hopper", "grace@acme.com"),
    ] {
        db::upsert_directory_user(
            pool,
            &DirectoryUser {
                tenant: "t1".into(),
                id: id.into(),
                first_name: first.into(),
                last_name: last.into(),
                email: email.into(),
            },
        )
        .await
        .unwrap();
    }
    db::upsert_directory_organization(
        pool,
        &DirectoryOrganization {
            tenant: "t1".into(),
            id: "o1".into(),
            name: "Acme Corp".into(),
            owner_id: None,
        },
    )
    .await
    .unwrap();
}

fn owner_handler(pool: &db::Pool, notifier: &RecordingNotifier) -> OwnerUpdatedHandler {
    OwnerUpdatedHandler::new(
        pool.clone(),
        Arc::new(notifier.clone()),
        Arc::new(TemplateCatalog::builtin()),
        "https://app.example.com/",
    )
}

#[tokio::test]
async fn new_owner_is_notified_by_email_and_in_app() {
    let pool = setup_pool().await;
    seed_directory(&pool).await;
    let notifier = RecordingNotifier::default();
    let handler = owner_handler(&pool, &notifier);

    handler
        .handle(&event(
            1,
            "OrganizationOwnerUpdated",
            json!({"organization_id": "o1", "owner_user_id": "u-grace", "actor_user_id": "u-ada"}),
        ))
        .await
        .unwrap();

    let sent = notifier.sent().await;
    assert_eq!(
        sent.iter().map(|n| n.channel).collect::<Vec<_>>(),
        vec![Channel::Email, Channel::InApp]
    );
    for n in &sent {
        assert_eq!(n.recipient_email, "grace@acme.com");
        assert_eq!(n.recipient_user_id.as_deref(), Some("u-grace"));
        assert_eq!(n.content.subject, "You are now the owner of Acme Corp");
        assert_eq!(
            n.content.body,
            "Hi Grace Hopper, Ada Lovelace made you the owner of Acme Corp. Open it at https://app.example.com/organization/o1"
        );
    }
}

#[tokio::test]
async fn self_assignment_sends_nothing() {
    let pool = setup_pool().await;
    seed_directory(&pool).await;
    let notifier = RecordingNotifier::default();
    let handler = owner_handler(&pool, &notifier);

    handler
        .handle(&event(
            1,
            "OrganizationOwnerUpdated",
            json!({"organization_id": "o1", "owner_user_id": "u-ada", "actor_user_id": "u-ada"}),
        ))
        .await
        .unwrap();
    assert!(notifier.sent().await.is_empty());
}

#[tokio::test]
async fn unknown_owner_parks_the_event() {
    let pool = setup_pool().await;
    seed_directory(&pool).await;
    let notifier = RecordingNotifier::default();
    let registry = events::HandlerRegistry::new().register(
        "OrganizationOwnerUpdated",
        Arc::new(owner_handler(&pool, &notifier)),
    );
    let group = ConsumerGroup::new(
        Subscription {
            group_name: "notifications".into(),
            pool_size: 1,
            ignore_events: false,
            event_types: Vec::new(),
            handler_timeout_secs: 5,
        },
        Arc::new(SqliteEventStore::new(pool.clone(), std::time::Duration::from_millis(10))),
        Arc::new(registry),
    );

    let disposition = group
        .dispatch(&event(
            7,
            "OrganizationOwnerUpdated",
            json!({"organization_id": "o1", "owner_user_id": "u-nobody", "actor_user_id": "u-ada"}),
        ))
        .await;
    match disposition {
        Disposition::Park(reason) => assert!(reason.contains("u-nobody")),
        Disposition::Ack => panic!("unknown owner must park"),
    }
    assert!(notifier.sent().await.is_empty());
}

#[tokio::test]
async fn directory_projection_tracks_upserts() {
    let pool = setup_pool().await;
    let projection = DirectoryProjection::new(pool.clone());

    projection
        .handle(&event(
            1,
            "UserUpserted",
            json!({"user_id": "u-1", "first_name": "Ada", "last_name": "Lovelace", "email": " Ada@Acme.com "}),
        ))
        .await
        .unwrap();
    projection
        .handle(&event(
            2,
            "OrganizationUpserted",
            json!({"organization_id": "o1", "name": "Acme", "owner_user_id": "u-1"}),
        ))
        .await
        .unwrap();
    // A later upsert without owner keeps the known one.
    projection
        .handle(&event(
            3,
            "OrganizationUpserted",
            json!({"organization_id": "o1", "name": "Acme Corp"}),
        ))
        .await
        .unwrap();

    let user = db::get_directory_user(&pool, "t1", "u-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.email, "ada@acme.com");
    assert_eq!(user.display_name(), "Ada Lovelace");
    let org = db::get_directory_organization(&pool, "t1", "o1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(org.name, "Acme Corp");
    assert_eq!(org.owner_id.as_deref(), Some("u-1"));

    assert!(projection
        .handle(&event(4, "UserUpserted", json!({"first_name": "no id"})))
        .await
        .is_err());
}

fn invoice_event(position: i64, event_type: &str) -> DomainEvent {
    event(
        position,
        event_type,
        json!({
            "invoice_id": "inv-1",
            "invoice_number": "INV-001",
            "currency": "eur",
            "amount_minor": 12100,
            "vat_minor": 2100,
            "subtotal_minor": 10000,
            "organization": {"id": "o1", "name": "Acme"},
            "line_items": []
        }),
    )
}

#[tokio::test]
async fn invoice_event_starts_one_workflow_per_endpoint() {
    let pool = setup_pool().await;
    let mut hook_ids = Vec::new();
    for (url, notify) in [
        ("https://a.tenant.io/hook", Some("ops@tenant.io")),
        ("https://b.tenant.io/hook", None),
    ] {
        let id = db::register_tenant_webhook(
            &pool,
            &NewTenantWebhook {
                tenant: "t1".into(),
                event_type: "invoice.finalized".into(),
                target_url: url.into(),
                auth_header_name: "X-Api-Key".into(),
                auth_header_value: "k".into(),
                notify_after_attempts: 2,
                notify_email: notify.map(str::to_string),
                notify_name: None,
            },
        )
        .await
        .unwrap();
        hook_ids.push(id);
    }
    db::register_tenant_webhook(
        &pool,
        &NewTenantWebhook {
            tenant: "t1".into(),
            event_type: "invoice.paid".into(),
            target_url: "https://c.tenant.io/hook".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let handler = InvoiceWebhookHandler::new(pool.clone(), engine(&pool));
    let finalized = invoice_event(10, "InvoiceFinalized");
    handler.handle(&finalized).await.unwrap();
    // Redelivery of the same event does not start new workflows.
    handler.handle(&finalized).await.unwrap();
    assert_eq!(db::count_pending_webhook_jobs(&pool).await.unwrap(), 2);

    let first = db::find_webhook_job(&pool, &workflow_id(&finalized, hook_ids[0]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.job.target_url, "https://a.tenant.io/hook");
    assert_eq!(first.job.auth_header_name, "X-Api-Key");
    assert!(first.job.notify_on_failure);
    assert_eq!(
        first.job.notification_payload.as_ref().map(|n| n.recipient_email.as_str()),
        Some("ops@tenant.io")
    );
    assert_eq!(first.job.request_body["event"], "invoice.finalized");
    assert_eq!(first.job.request_body["data"]["total"]["amount"], json!(121.0));

    let second = db::find_webhook_job(&pool, &workflow_id(&finalized, hook_ids[1]))
        .await
        .unwrap()
        .unwrap();
    assert!(!second.job.notify_on_failure);
    assert!(second.job.notification_payload.is_none());

    handler
        .handle(&invoice_event(11, "InvoicePaid"))
        .await
        .unwrap();
    assert_eq!(db::count_pending_webhook_jobs(&pool).await.unwrap(), 3);
}

#[tokio::test]
async fn invoice_without_endpoints_is_a_no_op() {
    let pool = setup_pool().await;
    let handler = InvoiceWebhookHandler::new(pool.clone(), engine(&pool));
    handler
        .handle(&invoice_event(1, "InvoicePaid"))
        .await
        .unwrap();
    assert_eq!(db::count_pending_webhook_jobs(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn default_registry_covers_every_event_type() {
    let pool = setup_pool().await;
    let registry = events::default_registry(
        &pool,
        &engine(&pool),
        Arc::new(RecordingNotifier::default()),
        Arc::new(TemplateCatalog::builtin()),
        "https://app.example.com",
    );
    assert_eq!(registry.len(), 5);
    for event_type in [
        "OrganizationOwnerUpdated",
        "UserUpserted",
        "OrganizationUpserted",
        "InvoiceFinalized",
        "InvoicePaid",
    ] {
        assert!(registry.get(event_type).is_some(), "{event_type}");
    }
}
