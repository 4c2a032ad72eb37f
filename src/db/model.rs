//! Row models returned by the repository functions.
//!
//! Keep these structs focused on what the queries return. Business logic
//! lives in the webhook engine and the event consumer.

use serde::{Deserialize, Serialize};

use crate::model::webhook::JobStatus;
use crate::model::WebhookDeliveryJob;

/// A tenant endpoint subscribed to one outbound event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantWebhook {
    pub id: i64,
    pub tenant: String,
    pub event_type: String,
    pub target_url: String,
    pub auth_header_name: String,
    pub auth_header_value: String,
    pub notify_after_attempts: u32,
    pub notify_email: Option<String>,
    pub notify_name: Option<String>,
}

/// Insert form of [`TenantWebhook`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTenantWebhook {
    pub tenant: String,
    pub event_type: String,
    pub target_url: String,
    pub auth_header_name: String,
    pub auth_header_value: String,
    pub notify_after_attempts: u32,
    pub notify_email: Option<String>,
    pub notify_name: Option<String>,
}

/// Durable state of one delivery workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookJobRow {
    pub id: i64,
    pub job: WebhookDeliveryJob,
    pub status: JobStatus,
    /// Attempts performed so far.
    pub attempt: u32,
    pub notified: bool,
    pub last_error: Option<String>,
    pub due_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookAttempt {
    pub attempt: u32,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Per consumer group state of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    InFlight,
    Acked,
    Parked,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::InFlight => "inflight",
            DeliveryState::Acked => "acked",
            DeliveryState::Parked => "parked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inflight" => Some(DeliveryState::InFlight),
            "acked" => Some(DeliveryState::Acked),
            "parked" => Some(DeliveryState::Parked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParkedEvent {
    pub position: i64,
    pub event_type: String,
    pub aggregate_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub tenant: String,
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl DirectoryUser {
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryOrganization {
    pub tenant: String,
    pub id: String,
    pub name: String,
    pub owner_id: Option<String>,
}
