//! Handlers registered on the consumer groups.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::consumer::EventHandler;
use crate::db::{self, DirectoryOrganization, DirectoryUser, Pool, TenantWebhook};
use crate::model::event::{
    InvoiceEventData, OrganizationUpserted, OwnerUpdated, UserUpserted, ORGANIZATION_UPSERTED,
    USER_UPSERTED,
};
use crate::model::{DomainEvent, FailureNotice, WebhookDeliveryJob};
use crate::notify::{
    Channel, ContentProvider, Notification, NotificationSender,
    ORGANIZATION_OWNER_UPDATED_TEMPLATE,
};
use crate::webhook::payload::{invoice_payload, webhook_event_for};
use crate::webhook::WebhookEngine;

/// Tells a user they became the owner of an organization, by e-mail and
/// in-app. Nothing is sent when users assign themselves.
pub struct OwnerUpdatedHandler {
    pool: Pool,
    notifier: Arc<dyn NotificationSender>,
    templates: Arc<dyn ContentProvider>,
    app_url: String,
}

impl OwnerUpdatedHandler {
    pub fn new(
        pool: Pool,
        notifier: Arc<dyn NotificationSender>,
        templates: Arc<dyn ContentProvider>,
        app_url: &str,
    ) -> Self {
        Self {
            pool,
            notifier,
            templates,
            app_url: app_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl EventHandler for OwnerUpdatedHandler {
    #[instrument(skip_all, fields(position = event.position, tenant = %event.tenant))]
    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        let data: OwnerUpdated = event.decode().context("malformed owner update")?;
        if data.actor_user_id == data.owner_user_id {
            debug!("owner assigned by themselves; no notification");
            return Ok(());
        }

        let owner = db::get_directory_user(&self.pool, &event.tenant, &data.owner_user_id)
            .await?
            .filter(|u| !u.email.is_empty())
            .ok_or_else(|| anyhow!("owner {} has no known e-mail", data.owner_user_id))?;
        let actor_name = db::get_directory_user(&self.pool, &event.tenant, &data.actor_user_id)
            .await?
            .map(|u| u.display_name())
            .unwrap_or_else(|| "A teammate".to_string());
        let organization_name =
            db::get_directory_organization(&self.pool, &event.tenant, &data.organization_id)
                .await?
                .map(|o| o.name)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| data.organization_id.clone());

        let mut values = BTreeMap::new();
        values.insert("user_name".to_string(), owner.display_name());
        values.insert("actor_name".to_string(), actor_name);
        values.insert("organization_name".to_string(), organization_name);
        values.insert(
            "organization_link".to_string(),
            format!("{}/organization/{}", self.app_url, data.organization_id),
        );
        let content = self
            .templates
            .render(ORGANIZATION_OWNER_UPDATED_TEMPLATE, &values)?;

        for channel in [Channel::Email, Channel::InApp] {
            let notification = Notification {
                tenant: event.tenant.clone(),
                channel,
                template: ORGANIZATION_OWNER_UPDATED_TEMPLATE.to_string(),
                recipient_email: owner.email.clone(),
                recipient_name: owner.display_name(),
                recipient_user_id: Some(owner.id.clone()),
                content: content.clone(),
            };
            self.notifier
                .send(&notification)
                .await
                .with_context(|| format!("failed to send {channel:?} notification"))?;
        }
        info!(owner = %owner.id, organization = %data.organization_id, "owner notified");
        Ok(())
    }
}

/// Keeps `directory_users` / `directory_organizations` in step with the
/// upsert events.
pub struct DirectoryProjection {
    pool: Pool,
}

impl DirectoryProjection {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventHandler for DirectoryProjection {
    #[instrument(skip_all, fields(position = event.position, event_type = %event.event_type))]
    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        match event.event_type.as_str() {
            USER_UPSERTED => {
                let data: UserUpserted = event.decode().context("malformed user upsert")?;
                db::upsert_directory_user(
                    &self.pool,
                    &DirectoryUser {
                        tenant: event.tenant.clone(),
                        id: data.user_id,
                        first_name: data.first_name,
                        last_name: data.last_name,
                        email: data.email.trim().to_lowercase(),
                    },
                )
                .await
            }
            ORGANIZATION_UPSERTED => {
                let data: OrganizationUpserted =
                    event.decode().context("malformed organization upsert")?;
                db::upsert_directory_organization(
                    &self.pool,
                    &DirectoryOrganization {
                        tenant: event.tenant.clone(),
                        id: data.organization_id,
                        name: data.name,
                        owner_id: data.owner_user_id,
                    },
                )
                .await
            }
            other => Err(anyhow!("directory projection cannot handle {other}")),
        }
    }
}

/// Starts one webhook workflow per tenant endpoint registered for the
/// invoice event.
pub struct InvoiceWebhookHandler {
    pool: Pool,
    engine: WebhookEngine,
}

impl InvoiceWebhookHandler {
    pub fn new(pool: Pool, engine: WebhookEngine) -> Self {
        Self { pool, engine }
    }

    fn job_for(
        &self,
        event: &DomainEvent,
        webhook_event: &str,
        hook: &TenantWebhook,
        body: serde_json::Value,
    ) -> WebhookDeliveryJob {
        let notification_payload = hook.notify_email.as_ref().map(|email| FailureNotice {
            recipient_email: email.clone(),
            recipient_name: hook.notify_name.clone().unwrap_or_default(),
            event_type: webhook_event.to_string(),
        });
        WebhookDeliveryJob {
            workflow_id: workflow_id(event, hook.id),
            tenant: event.tenant.clone(),
            target_url: hook.target_url.clone(),
            auth_header_name: hook.auth_header_name.clone(),
            auth_header_value: hook.auth_header_value.clone(),
            request_body: body,
            retry_policy: self.engine.default_policy(),
            notify_after_attempts: hook.notify_after_attempts,
            notify_on_failure: notification_payload.is_some(),
            notification_payload,
        }
    }
}

/// Stable per (event, endpoint): a redelivered event resumes the same
/// workflow instead of starting a second one.
pub fn workflow_id(event: &DomainEvent, webhook_id: i64) -> String {
    format!(
        "{}-{}-{}-{}",
        event.event_type, event.aggregate_id, event.position, webhook_id
    )
}

#[async_trait]
impl EventHandler for InvoiceWebhookHandler {
    #[instrument(skip_all, fields(position = event.position, tenant = %event.tenant))]
    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        let webhook_event = webhook_event_for(&event.event_type)
            .ok_or_else(|| anyhow!("{} is not an invoice event", event.event_type))?;
        let data: InvoiceEventData = event.decode().context("malformed invoice event")?;
        let hooks = db::list_tenant_webhooks(&self.pool, &event.tenant, webhook_event).await?;
        if hooks.is_empty() {
            debug!(webhook_event, "no tenant webhook registered");
            return Ok(());
        }
        let body = serde_json::to_value(invoice_payload(webhook_event, &data))?;
        for hook in &hooks {
            let job = self.job_for(event, webhook_event, hook, body.clone());
            self.engine.dispatch(&job).await?;
        }
        info!(webhook_event, endpoints = hooks.len(), "invoice webhooks dispatched");
        Ok(())
    }
}
