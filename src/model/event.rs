use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Aggregates whose id starts with this prefix belong to system streams.
pub const SYSTEM_STREAM_PREFIX: &str = "$";

pub const ORGANIZATION_OWNER_UPDATED: &str = "OrganizationOwnerUpdated";
pub const ORGANIZATION_UPSERTED: &str = "OrganizationUpserted";
pub const USER_UPSERTED: &str = "UserUpserted";
pub const INVOICE_FINALIZED: &str = "InvoiceFinalized";
pub const INVOICE_PAID: &str = "InvoicePaid";

/// One entry of the append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainEvent {
    pub position: i64,
    pub aggregate_id: String,
    pub tenant: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: Option<DateTime<Utc>>,
}

impl DomainEvent {
    pub fn is_system(&self) -> bool {
        self.aggregate_id.starts_with(SYSTEM_STREAM_PREFIX)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerUpdated {
    pub organization_id: String,
    pub owner_user_id: String,
    #[serde(default)]
    pub actor_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserUpserted {
    pub user_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrganizationUpserted {
    pub organization_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner_user_id: Option<String>,
}

/// Invoice data carried by `InvoiceFinalized` / `InvoicePaid`.
/// Amounts are in the currency's smallest unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvoiceEventData {
    pub invoice_id: String,
    #[serde(default)]
    pub invoice_number: String,
    pub currency: String,
    pub amount_minor: i64,
    #[serde(default)]
    pub vat_minor: i64,
    #[serde(default)]
    pub subtotal_minor: i64,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub invoice_url: String,
    pub organization: InvoiceOrganization,
    #[serde(default)]
    pub contract_id: Option<String>,
    #[serde(default)]
    pub line_items: Vec<InvoiceLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvoiceOrganization {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvoiceLine {
    #[serde(default)]
    pub id: String,
    pub description: String,
    pub quantity: i64,
    pub price_minor: i64,
    pub amount_minor: i64,
}
