//! Tenant-facing webhook bodies.
//!
//! Amounts are published twice: in major units (`12.5`) and in the
//! currency's smallest unit (`1250`).
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::event::{InvoiceEventData, INVOICE_FINALIZED, INVOICE_PAID};

pub const WEBHOOK_INVOICE_FINALIZED: &str = "invoice.finalized";
pub const WEBHOOK_INVOICE_PAID: &str = "invoice.paid";

/// Public webhook event name for an internal event type.
pub fn webhook_event_for(event_type: &str) -> Option<&'static str> {
    match event_type {
        INVOICE_FINALIZED => Some(WEBHOOK_INVOICE_FINALIZED),
        INVOICE_PAID => Some(WEBHOOK_INVOICE_PAID),
        _ => None,
    }
}

/// Number of decimal places of an ISO 4217 currency.
pub fn currency_exponent(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF" | "UGX"
        | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

pub fn to_major_units(minor: i64, currency: &str) -> f64 {
    minor as f64 / 10_f64.powi(currency_exponent(currency) as i32)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Money {
    pub amount: f64,
    pub amount_in_smallest_unit: i64,
}

impl Money {
    fn new(minor: i64, currency: &str) -> Self {
        Self {
            amount: to_major_units(minor, currency),
            amount_in_smallest_unit: minor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoicePayload {
    pub event: String,
    pub data: InvoiceData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceData {
    pub id: String,
    pub number: String,
    pub currency: String,
    pub total: Money,
    pub subtotal: Money,
    pub vat: Money,
    pub due_date: Option<DateTime<Utc>>,
    pub invoice_url: String,
    pub organization: OrganizationRef,
    pub contract: Option<ContractRef>,
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrganizationRef {
    pub id: String,
    pub name: String,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub id: String,
    pub description: String,
    pub quantity: i64,
    pub price: Money,
    pub total: Money,
}

pub fn invoice_payload(webhook_event: &str, data: &InvoiceEventData) -> InvoicePayload {
    let currency = data.currency.to_ascii_uppercase();
    InvoicePayload {
        event: webhook_event.to_string(),
        data: InvoiceData {
            id: data.invoice_id.clone(),
            number: data.invoice_number.clone(),
            total: Money::new(data.amount_minor, &currency),
            subtotal: Money::new(data.subtotal_minor, &currency),
            vat: Money::new(data.vat_minor, &currency),
            due_date: data.due_date,
            invoice_url: data.invoice_url.clone(),
            organization: OrganizationRef {
                id: data.organization.id.clone(),
                name: data.organization.name.clone(),
                external_id: data.organization.external_id.clone(),
            },
            contract: data.contract_id.clone().map(|id| ContractRef { id }),
            line_items: data
                .line_items
                .iter()
                .map(|line| LineItem {
                    id: line.id.clone(),
                    description: line.description.clone(),
                    quantity: line.quantity,
                    price: Money::new(line.price_minor, &currency),
                    total: Money::new(line.amount_minor, &currency),
                })
                .collect(),
            currency,
        },
    }
}
