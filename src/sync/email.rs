//! Mail messages fan out into the entity kinds they imply.
//!
//! For one batch, every business address yields a contact linked to an
//! organization for its domain, every thread yields a session, and every
//! message yields an interaction event in that session. Addresses at
//! personal mail providers never create contacts or organizations. All four
//! sub-batches share one sync date and run in dependency order.
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::{
    ContactSync, InteractionEventSync, InteractionSessionSync, Orchestrator, OrganizationSync,
};
use crate::error::SyncError;
use crate::model::{
    BelongsTo, ContactInput, EmailInput, ExternalReference, InteractionEventInput,
    InteractionParticipant, InteractionSessionInput, OrganizationInput, ReferencedContact,
    ReferencedInteractionSession, ReferencedOrganization, ReferencedParticipant, SyncMeta,
    SyncRunSummary,
};

/// `Display Name <local@domain>` or a bare address.
static ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:"?([^",<>]*?)"?\s*<)?([A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,})>?"#)
        .expect("ADDRESS regex should compile")
});

/// Subjects stamped by mailbox warm-up tools.
const WARMUP_SUFFIXES: [&str; 2] = ["• lemwarmup", "• lemwarm"];

pub const EMAIL_CHANNEL: &str = "EMAIL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub name: String,
    pub email: String,
}

/// Every address in a header value, lower-cased, in order of appearance.
pub fn parse_addresses(header: &str) -> Vec<Address> {
    ADDRESS
        .captures_iter(header)
        .filter_map(|c| {
            let email = c.get(2)?.as_str().to_lowercase();
            let name = c.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            Some(Address {
                name: name.to_string(),
                email,
            })
        })
        .collect()
}

fn lines(value: &str) -> Vec<String> {
    value
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailSyncSummary {
    pub organizations: SyncRunSummary,
    pub contacts: SyncRunSummary,
    pub sessions: SyncRunSummary,
    pub events: SyncRunSummary,
}

#[derive(Debug, Default)]
struct EmailPlan {
    organizations: Vec<OrganizationInput>,
    contacts: Vec<ContactInput>,
    sessions: Vec<InteractionSessionInput>,
    events: Vec<InteractionEventInput>,
}

#[derive(Clone)]
pub struct EmailSync {
    organizations: Orchestrator<OrganizationSync>,
    contacts: Orchestrator<ContactSync>,
    sessions: Orchestrator<InteractionSessionSync>,
    events: Orchestrator<InteractionEventSync>,
    domains: OrganizationSync,
}

impl EmailSync {
    /// `domains` decides which addresses belong to personal providers.
    pub fn new(
        organizations: Orchestrator<OrganizationSync>,
        contacts: Orchestrator<ContactSync>,
        sessions: Orchestrator<InteractionSessionSync>,
        events: Orchestrator<InteractionEventSync>,
        domains: OrganizationSync,
    ) -> Self {
        Self {
            organizations,
            contacts,
            sessions,
            events,
            domains,
        }
    }

    pub async fn sync_batch(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        emails: Vec<EmailInput>,
    ) -> Result<EmailSyncSummary, SyncError> {
        self.sync_batch_at(cancel, tenant, Utc::now(), emails).await
    }

    #[instrument(skip_all, fields(tenant = %tenant, emails = emails.len(), %sync_date))]
    pub async fn sync_batch_at(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        sync_date: DateTime<Utc>,
        emails: Vec<EmailInput>,
    ) -> Result<EmailSyncSummary, SyncError> {
        let plan = self.plan(emails);
        // Reject a bad batch before any derived entity is written.
        self.events.validate(&plan.events)?;

        let organizations = self
            .organizations
            .sync_batch_at(cancel, tenant, sync_date, plan.organizations)
            .await?;
        let contacts = self
            .contacts
            .sync_batch_at(cancel, tenant, sync_date, plan.contacts)
            .await?;
        let sessions = self
            .sessions
            .sync_batch_at(cancel, tenant, sync_date, plan.sessions)
            .await?;
        let events = self
            .events
            .sync_batch_at(cancel, tenant, sync_date, plan.events)
            .await?;
        info!(
            organizations = organizations.total,
            contacts = contacts.total,
            sessions = sessions.total,
            events = events.total,
            "emails synced"
        );
        Ok(EmailSyncSummary {
            organizations,
            contacts,
            sessions,
            events,
        })
    }

    fn plan(&self, emails: Vec<EmailInput>) -> EmailPlan {
        let mut plan = EmailPlan::default();
        let mut seen_emails: HashSet<String> = HashSet::new();
        let mut seen_domains: HashSet<String> = HashSet::new();
        let mut seen_threads: HashSet<String> = HashSet::new();

        for email in emails {
            let derived_meta = SyncMeta {
                external: ExternalReference {
                    external_system_id: email.meta.external.external_system_id.clone(),
                    ..Default::default()
                },
                app_source: email.meta.app_source.clone(),
                ..Default::default()
            };
            let subject = email.subject.trim();
            let warmup = WARMUP_SUFFIXES.iter().any(|s| subject.ends_with(s));
            let from = parse_addresses(&email.sent_by).into_iter().next();
            let to = parse_addresses(&email.sent_to);
            let cc = parse_addresses(&email.cc);
            let bcc = parse_addresses(&email.bcc);
            let thread_id = email.thread_id.trim().to_string();

            if !warmup {
                for address in from.iter().chain(&to).chain(&cc).chain(&bcc) {
                    let Some(domain) = self
                        .domains
                        .extract_domains([address.email.as_str()])
                        .into_iter()
                        .next()
                    else {
                        continue;
                    };
                    if seen_domains.insert(domain.clone()) {
                        plan.organizations.push(OrganizationInput {
                            meta: derived_meta.clone(),
                            name: domain.clone(),
                            domains: vec![domain.clone()],
                            domain_required: true,
                            ..Default::default()
                        });
                    }
                    if seen_emails.insert(address.email.clone()) {
                        plan.contacts.push(ContactInput {
                            meta: derived_meta.clone(),
                            name: address.name.clone(),
                            emails: vec![address.email.clone()],
                            organizations: vec![ReferencedOrganization::by_domain(domain)],
                            ..Default::default()
                        });
                    }
                }
                if !thread_id.is_empty() && seen_threads.insert(thread_id.clone()) {
                    plan.sessions.push(InteractionSessionInput {
                        meta: SyncMeta {
                            external: ExternalReference {
                                external_id: thread_id.clone(),
                                ..derived_meta.external.clone()
                            },
                            ..derived_meta.clone()
                        },
                        name: subject.to_string(),
                        status: "ACTIVE".into(),
                        session_type: "THREAD".into(),
                        channel: EMAIL_CHANNEL.into(),
                        identifier: thread_id.clone(),
                    });
                }
            }

            let channel_data = json!({
                "subject": subject,
                "references": lines(&email.references),
                "in_reply_to": lines(&email.in_reply_to),
            })
            .to_string();
            let receivers = [("TO", &to), ("CC", &cc), ("BCC", &bcc)]
                .into_iter()
                .flat_map(|(relation, addresses)| {
                    addresses.iter().map(move |a| {
                        InteractionParticipant::new(
                            ReferencedParticipant::contact(ReferencedContact::by_email(&a.email)),
                            relation,
                        )
                    })
                })
                .collect();
            let mut meta = email.meta;
            if warmup {
                meta.skip = true;
                meta.skip_reason = "email warmup".into();
            }
            let identifier = meta.external.external_id.trim().to_string();
            plan.events.push(InteractionEventInput {
                meta,
                content: email.content,
                content_type: email.content_type,
                channel: EMAIL_CHANNEL.into(),
                channel_data: Some(channel_data),
                identifier,
                belongs_to: BelongsTo {
                    issue: None,
                    session: (!thread_id.is_empty())
                        .then(|| ReferencedInteractionSession::by_external_id(thread_id)),
                },
                sent_by: from.map(|a| {
                    InteractionParticipant::new(
                        ReferencedParticipant::contact(ReferencedContact::by_email(a.email)),
                        "",
                    )
                }),
                sent_to: receivers,
                ..Default::default()
            });
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_and_bare_addresses() {
        let parsed = parse_addresses(r#""Ada Lovelace" <Ada@Acme.com>, bob@beta.io,Carol <carol@gamma.org>"#);
        assert_eq!(
            parsed,
            vec![
                Address {
                    name: "Ada Lovelace".into(),
                    email: "ada@acme.com".into()
                },
                Address {
                    name: String::new(),
                    email: "bob@beta.io".into()
                },
                Address {
                    name: "Carol".into(),
                    email: "carol@gamma.org".into()
                },
            ]
        );
        assert!(parse_addresses("undisclosed-recipients:;").is_empty());
    }

    #[test]
    fn address_pattern_compiles() {
        Lazy::force(&ADDRESS);
    }

    #[test]
    fn reference_headers_split_by_line() {
        assert_eq!(
            lines("<a@mail>\n\n  <b@mail>  \n"),
            vec!["<a@mail>".to_string(), "<b@mail>".to_string()]
        );
    }
}
