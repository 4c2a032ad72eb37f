use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::{EntitySync, ItemContext, Prepared};
use crate::error::BackendError;
use crate::model::{EntityKind, OrderInput, SyncMeta};

/// Orders always belong to an organization; an unresolvable one skips the
/// order.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderSync;

#[derive(Debug)]
pub struct OrderRefs {
    pub organization_id: String,
}

#[async_trait]
impl EntitySync for OrderSync {
    type Input = OrderInput;
    type Refs = OrderRefs;

    fn kind(&self) -> EntityKind {
        EntityKind::Order
    }

    fn meta<'a>(&self, input: &'a OrderInput) -> &'a SyncMeta {
        &input.meta
    }

    fn normalize(&self, input: &mut OrderInput, now: DateTime<Utc>) {
        input.normalize(now);
    }

    async fn resolve_references(
        &self,
        cx: &ItemContext<'_>,
        input: &OrderInput,
    ) -> Result<Prepared<OrderRefs>, BackendError> {
        match cx
            .finder
            .organization(cx.tenant, cx.external_system, &input.ordered_by)
            .await?
        {
            Some(organization_id) => Ok(Prepared::Ready(OrderRefs { organization_id })),
            None => Ok(Prepared::Skip("ordered-by organization not found".into())),
        }
    }

    fn attributes(&self, input: &OrderInput, refs: &OrderRefs) -> serde_json::Value {
        json!({
            "organization_id": refs.organization_id,
            "confirmed_at": input.confirmed_at,
            "paid_at": input.paid_at,
            "fulfilled_at": input.fulfilled_at,
            "canceled_at": input.canceled_at,
            "created_at": input.meta.created_at,
            "updated_at": input.meta.updated_at,
        })
    }
}
