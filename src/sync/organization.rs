//! Organizations match by external id, explicit id, then domain.
//!
//! Domains come from both `domains` and `website`; personal mail providers
//! are never treated as company domains. Sub-organizations carry no domains
//! of their own.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::collections::HashSet;
use tracing::warn;

use super::{EntitySync, ItemContext, Prepared};
use crate::backend::{Link, NaturalKey};
use crate::error::BackendError;
use crate::model::{EntityKind, OrganizationInput, SyncMeta};

static HOST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-z][a-z0-9+.\-]*://)?(?:[^@/]*@)?(?:www\.)?([a-z0-9\-]+(?:\.[a-z0-9\-]+)+)")
        .expect("HOST regex should compile")
});

static PERSONAL_EMAIL_DOMAINS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "gmail.com",
        "googlemail.com",
        "yahoo.com",
        "hotmail.com",
        "outlook.com",
        "live.com",
        "icloud.com",
        "me.com",
        "aol.com",
        "gmx.com",
        "mail.com",
        "protonmail.com",
        "yandex.com",
    ]
});

#[derive(Debug, Clone)]
pub struct OrganizationSync {
    personal_email_domains: HashSet<String>,
}

impl Default for OrganizationSync {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl OrganizationSync {
    pub fn new(extra_personal_domains: &[String]) -> Self {
        let mut personal_email_domains: HashSet<String> = PERSONAL_EMAIL_DOMAINS
            .iter()
            .map(|d| d.to_string())
            .collect();
        personal_email_domains.extend(
            extra_personal_domains
                .iter()
                .map(|d| d.trim().to_lowercase())
                .filter(|d| !d.is_empty()),
        );
        Self {
            personal_email_domains,
        }
    }

    /// Host part of every candidate, lower-cased and de-duplicated, minus
    /// personal email providers.
    pub fn extract_domains<'a>(&self, candidates: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for candidate in candidates {
            let lowered = candidate.trim().to_lowercase();
            let Some(host) = HOST.captures(&lowered).and_then(|c| c.get(1)) else {
                continue;
            };
            let host = host.as_str().trim_matches('.').to_string();
            if self.personal_email_domains.contains(&host) || out.contains(&host) {
                continue;
            }
            out.push(host);
        }
        out
    }
}

#[derive(Debug, Default)]
pub struct OrganizationRefs {
    pub parent_id: Option<String>,
}

#[async_trait]
impl EntitySync for OrganizationSync {
    type Input = OrganizationInput;
    type Refs = OrganizationRefs;

    fn kind(&self) -> EntityKind {
        EntityKind::Organization
    }

    fn meta<'a>(&self, input: &'a OrganizationInput) -> &'a SyncMeta {
        &input.meta
    }

    fn normalize(&self, input: &mut OrganizationInput, now: DateTime<Utc>) {
        input.normalize(now);
        if input.parent.is_some() {
            input.domains.clear();
            return;
        }
        let candidates: Vec<String> = input
            .domains
            .iter()
            .cloned()
            .chain(std::iter::once(input.website.clone()))
            .filter(|c| !c.is_empty())
            .collect();
        input.domains = self.extract_domains(candidates.iter().map(String::as_str));
    }

    fn precheck(&self, input: &OrganizationInput) -> Option<String> {
        if input.domain_required && input.parent.is_none() && input.domains.is_empty() {
            return Some("missing domain while required".into());
        }
        None
    }

    async fn resolve_references(
        &self,
        cx: &ItemContext<'_>,
        input: &OrganizationInput,
    ) -> Result<Prepared<OrganizationRefs>, BackendError> {
        let Some(parent) = &input.parent else {
            return Ok(Prepared::Ready(OrganizationRefs::default()));
        };
        let parent_id = cx
            .finder
            .organization(cx.tenant, cx.external_system, parent)
            .await?;
        if parent_id.is_none() {
            warn!(
                tenant = cx.tenant,
                external_id = %input.meta.external.external_id,
                "parent organization not found; syncing without it"
            );
        }
        Ok(Prepared::Ready(OrganizationRefs { parent_id }))
    }

    fn natural_keys(&self, input: &OrganizationInput) -> Vec<NaturalKey> {
        input
            .domains
            .iter()
            .map(|d| NaturalKey::Domain(d.clone()))
            .collect()
    }

    fn attributes(&self, input: &OrganizationInput, _refs: &OrganizationRefs) -> serde_json::Value {
        json!({
            "name": input.name,
            "description": input.description,
            "website": input.website,
            "industry": input.industry,
            "employees": input.employees,
            "is_sub_organization": input.parent.is_some(),
            "created_at": input.meta.created_at,
            "updated_at": input.meta.updated_at,
        })
    }

    fn links(&self, input: &OrganizationInput, refs: &OrganizationRefs) -> Vec<Link> {
        let mut links: Vec<Link> = input
            .domains
            .iter()
            .map(|d| Link::Domain { domain: d.clone() })
            .collect();
        if let Some(parent_id) = &refs.parent_id {
            links.push(Link::ParentOrganization {
                parent_id: parent_id.clone(),
                relationship: input.parent_relationship.clone(),
            });
        }
        if let Some(email) = &input.email {
            links.push(Link::Email {
                email: email.clone(),
                primary: true,
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
        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReferencedOrganization;

    #[test]
    fn host_pattern_compiles() {
        Lazy::force(&HOST);
    }

    #[test]
    fn extracts_hosts_from_urls_and_emails() {
        let s = OrganizationSync::default();
        let domains = s.extract_domains([
            "https://www.Acme.com/about",
            "acme.com",
            "billing@acme.io",
            "http://gmail.com",
            "not a domain",
        ]);
        assert_eq!(domains, vec!["acme.com".to_string(), "acme.io".to_string()]);
    }

    #[test]
    fn configured_personal_domains_are_dropped() {
        let s = OrganizationSync::new(&["Proton.me".to_string()]);
        assert!(s.extract_domains(["proton.me"]).is_empty());
    }

    #[test]
    fn website_feeds_domains() {
        let s = OrganizationSync::default();
        let mut input = OrganizationInput {
            website: "https://globex.com".into(),
            domains: vec!["GLOBEX.com".into(), "gmail.com".into()],
            ..Default::default()
        };
        s.normalize(&mut input, Utc::now());
        assert_eq!(input.domains, vec!["globex.com".to_string()]);
    }

    #[test]
    fn sub_organizations_drop_domains() {
        let s = OrganizationSync::default();
        let mut input = OrganizationInput {
            domains: vec!["globex.com".into()],
            parent: Some(ReferencedOrganization::by_external_id("p1")),
            domain_required: true,
            ..Default::default()
        };
        s.normalize(&mut input, Utc::now());
        assert!(input.domains.is_empty());
        assert_eq!(s.precheck(&input), None);
    }

    #[test]
    fn required_domain_missing_is_skipped() {
        let s = OrganizationSync::default();
        let mut input = OrganizationInput {
            website: "https://gmail.com".into(),
            domain_required: true,
            ..Default::default()
        };
        s.normalize(&mut input, Utc::now());
        assert_eq!(
            s.precheck(&input).as_deref(),
            Some("missing domain while required")
        );
    }
}
