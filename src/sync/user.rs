use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::{EntitySync, ItemContext, Prepared};
use crate::backend::{Link, NaturalKey};
use crate::error::BackendError;
use crate::model::{EntityKind, SyncMeta, UserInput};

#[derive(Debug, Clone, Copy, Default)]
pub struct UserSync;

#[async_trait]
impl EntitySync for UserSync {
    type Input = UserInput;
    type Refs = ();

    fn kind(&self) -> EntityKind {
        EntityKind::User
    }

    fn meta<'a>(&self, input: &'a UserInput) -> &'a SyncMeta {
        &input.meta
    }

    fn normalize(&self, input: &mut UserInput, now: DateTime<Utc>) {
        input.normalize(now);
    }

    async fn resolve_references(
        &self,
        _cx: &ItemContext<'_>,
        _input: &UserInput,
    ) -> Result<Prepared<()>, BackendError> {
        Ok(Prepared::Ready(()))
    }

    fn natural_keys(&self, input: &UserInput) -> Vec<NaturalKey> {
        input.email.iter().cloned().map(NaturalKey::Email).collect()
    }

    fn attributes(&self, input: &UserInput, _refs: &()) -> serde_json::Value {
        json!({
            "first_name": input.first_name,
            "last_name": input.last_name,
            "name": input.name,
            "profile_photo_url": input.profile_photo_url,
            "timezone": input.timezone,
            "created_at": input.meta.created_at,
            "updated_at": input.meta.updated_at,
        })
    }

    fn links(&self, input: &UserInput, _refs: &()) -> Vec<Link> {
        let mut links: Vec<Link> = input
            .email
            .iter()
            .map(|email| Link::Email {
                email: email.clone(),
                primary: true,
            })
            .collect();
        links.extend(
            input
                .phone_numbers
                .iter()
                .enumerate()
                .map(|(i, number)| Link::PhoneNumber {
                    number: number.clone(),
                    primary: i == 0,
                }),
        );
        links
    }
}
