use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::{EntitySync, ItemContext, Prepared};
use crate::backend::{Link, NaturalKey};
use crate::error::BackendError;
use crate::model::{ContactInput, EntityKind, SyncMeta};

/// Contacts match by external id, then by any of their emails.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContactSync;

#[derive(Debug, Default)]
pub struct ContactRefs {
    pub organization_ids: Vec<String>,
}

#[async_trait]
impl EntitySync for ContactSync {
    type Input = ContactInput;
    type Refs = ContactRefs;

    fn kind(&self) -> EntityKind {
        EntityKind::Contact
    }

    fn meta<'a>(&self, input: &'a ContactInput) -> &'a SyncMeta {
        &input.meta
    }

    fn normalize(&self, input: &mut ContactInput, now: DateTime<Utc>) {
        input.normalize(now);
    }

    async fn resolve_references(
        &self,
        cx: &ItemContext<'_>,
        input: &ContactInput,
    ) -> Result<Prepared<ContactRefs>, BackendError> {
        let mut organization_ids: Vec<String> = Vec::new();
        for org in &input.organizations {
            if let Some(id) = cx
                .finder
                .organization(cx.tenant, cx.external_system, org)
                .await?
            {
                if !organization_ids.contains(&id) {
                    organization_ids.push(id);
                }
            }
        }
        if input.organization_required && organization_ids.is_empty() {
            return Ok(Prepared::Skip("organization not found".into()));
        }
        Ok(Prepared::Ready(ContactRefs { organization_ids }))
    }

    fn natural_keys(&self, input: &ContactInput) -> Vec<NaturalKey> {
        input
            .emails
            .iter()
            .map(|e| NaturalKey::Email(e.clone()))
            .collect()
    }

    fn attributes(&self, input: &ContactInput, _refs: &ContactRefs) -> serde_json::Value {
        json!({
            "first_name": input.first_name,
            "last_name": input.last_name,
            "name": input.name,
            "description": input.description,
            "timezone": input.timezone,
            "created_at": input.meta.created_at,
            "updated_at": input.meta.updated_at,
        })
    }

    fn links(&self, input: &ContactInput, refs: &ContactRefs) -> Vec<Link> {
        let mut links = Vec::new();
        for (i, email) in input.emails.iter().enumerate() {
            links.push(Link::Email {
                email: email.clone(),
                primary: i == 0,
            });
        }
        for (i, number) in input.phone_numbers.iter().enumerate() {
            links.push(Link::PhoneNumber {
                number: number.clone(),
                primary: i == 0,
            });
        }
        if let Some(location) = &input.location {
            links.push(Link::Location(location.clone()));
        }
        for url in &input.social_urls {
            links.push(Link::SocialUrl { url: url.clone() });
        }
        for organization_id in &refs.organization_ids {
            links.push(Link::JobRole {
                organization_id: organization_id.clone(),
                job_title: input.job_title.clone(),
            });
        }
        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_email_and_phone_are_primary() {
        let input = ContactInput {
            emails: vec!["a@x.io".into(), "b@x.io".into()],
            phone_numbers: vec!["+1".into()],
            ..Default::default()
        };
        let links = ContactSync.links(&input, &ContactRefs::default());
        assert_eq!(
            links,
            vec![
                Link::Email {
                    email: "a@x.io".into(),
                    primary: true
                },
                Link::Email {
                    email: "b@x.io".into(),
                    primary: false
                },
                Link::PhoneNumber {
                    number: "+1".into(),
                    primary: true
                },
            ]
        );
    }

    #[test]
    fn emails_are_natural_keys() {
        let input = ContactInput {
            emails: vec!["a@x.io".into()],
            ..Default::default()
        };
        assert_eq!(
            ContactSync.natural_keys(&input),
            vec![NaturalKey::Email("a@x.io".into())]
        );
    }
}
