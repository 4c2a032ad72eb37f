//! Outbound webhook delivery: the HTTP sender, tenant payloads and the
//! durable retry workflow.
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::Webhooks;
use crate::error::DeliveryError;
use crate::model::WebhookDeliveryJob;

pub mod payload;
pub mod workflow;

pub use workflow::WebhookEngine;

/// One delivery attempt. `Ok` only when the endpoint accepted the event.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn deliver(&self, job: &WebhookDeliveryJob) -> Result<(), DeliveryError>;
}

#[derive(Clone)]
pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new(cfg: &Webhooks) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .user_agent(cfg.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    /// POST with a JSON body plus the tenant's auth header, if configured.
    pub fn build_request(&self, job: &WebhookDeliveryJob) -> Result<reqwest::Request, DeliveryError> {
        let mut builder = self
            .client
            .post(&job.target_url)
            .header(CONTENT_TYPE, "application/json")
            .body(job.request_body.to_string());
        if !job.auth_header_name.trim().is_empty() {
            let name = HeaderName::from_bytes(job.auth_header_name.trim().as_bytes())
                .map_err(|e| DeliveryError::InvalidRequest(e.to_string()))?;
            let value = HeaderValue::from_str(&job.auth_header_value)
                .map_err(|e| DeliveryError::InvalidRequest(e.to_string()))?;
            builder = builder.header(name, value);
        }
        builder
            .build()
            .map_err(|e| DeliveryError::InvalidRequest(e.to_string()))
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    #[instrument(skip_all, fields(workflow_id = %job.workflow_id, url = %job.target_url))]
    async fn deliver(&self, job: &WebhookDeliveryJob) -> Result<(), DeliveryError> {
        let req = self.build_request(job)?;
        let resp = self
            .client
            .execute(req)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        let status = resp.status();
        debug!(%status, "webhook endpoint answered");
        // Exactly 200; other 2xx codes count as failures too.
        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }
}
