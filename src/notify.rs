//! Outbound notifications (e-mail and in-app) and the template catalog that
//! renders their content.
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

use crate::config::Notifications;

pub const ORGANIZATION_OWNER_UPDATED_TEMPLATE: &str = "organization-owner-updated";
pub const WEBHOOK_DELIVERY_FAILED_TEMPLATE: &str = "webhook-delivery-failed";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown template {0}")]
    UnknownTemplate(String),
    #[error("template {template} requires placeholder {placeholder}")]
    MissingPlaceholder {
        template: String,
        placeholder: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    InApp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedContent {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub tenant: String,
    pub channel: Channel,
    pub template: String,
    pub recipient_email: String,
    #[serde(default)]
    pub recipient_name: String,
    #[serde(default)]
    pub recipient_user_id: Option<String>,
    pub content: RenderedContent,
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Renders named templates from placeholder values.
pub trait ContentProvider: Send + Sync {
    fn render(
        &self,
        template: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<RenderedContent, TemplateError>;
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").expect("PLACEHOLDER regex should compile")
});

#[derive(Debug, Clone)]
struct Template {
    subject: &'static str,
    body: &'static str,
    required: &'static [&'static str],
}

/// Built-in templates with `{{placeholder}}` syntax.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: HashMap<&'static str, Template>,
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateCatalog {
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            ORGANIZATION_OWNER_UPDATED_TEMPLATE,
            Template {
                subject: "You are now the owner of {{organization_name}}",
                body: "Hi {{user_name}}, {{actor_name}} made you the owner of {{organization_name}}. Open it at {{organization_link}}",
                required: &["user_name", "actor_name", "organization_name", "organization_link"],
            },
        );
        templates.insert(
            WEBHOOK_DELIVERY_FAILED_TEMPLATE,
            Template {
                subject: "Webhook delivery failing for {{event_type}}",
                body: "Hi {{recipient_name}}, delivering {{event_type}} to {{target_url}} has failed {{attempts}} times. Last error: {{last_error}}",
                required: &["event_type", "target_url", "attempts"],
            },
        );
        Self { templates }
    }
}

impl ContentProvider for TemplateCatalog {
    fn render(
        &self,
        template: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<RenderedContent, TemplateError> {
        let tpl = self
            .templates
            .get(template)
            .ok_or_else(|| TemplateError::UnknownTemplate(template.to_string()))?;
        for placeholder in tpl.required {
            if values.get(*placeholder).map_or(true, |v| v.trim().is_empty()) {
                return Err(TemplateError::MissingPlaceholder {
                    template: template.to_string(),
                    placeholder: placeholder.to_string(),
                });
            }
        }
        let fill = |text: &str| {
            PLACEHOLDER
                .replace_all(text, |caps: &regex::Captures| {
                    values.get(&caps[1]).cloned().unwrap_or_default()
                })
                .into_owned()
        };
        Ok(RenderedContent {
            subject: fill(tpl.subject),
            body: fill(tpl.body),
        })
    }
}

/// Posts notifications as JSON to the provider endpoint.
#[derive(Clone)]
pub struct HttpNotificationSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpNotificationSender {
    pub fn new(cfg: &Notifications, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            api_key: cfg.api_key.clone(),
        })
    }

    pub fn build_request(&self, notification: &Notification) -> reqwest::Result<reqwest::Request> {
        self.client
            .post(&self.endpoint)
            .header("X-Api-Key", &self.api_key)
            .json(notification)
            .build()
    }
}

#[async_trait]
impl NotificationSender for HttpNotificationSender {
    #[instrument(skip_all, fields(tenant = %notification.tenant, template = %notification.template))]
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        let req = self.build_request(notification)?;
        let resp = self.client.execute(req).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("notification provider returned {}: {}", status, body);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_pattern_compiles() {
        Lazy::force(&PLACEHOLDER);
    }

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renders_all_placeholders() {
        let catalog = TemplateCatalog::builtin();
        let content = catalog
            .render(
                ORGANIZATION_OWNER_UPDATED_TEMPLATE,
                &values(&[
                    ("user_name", "Ada"),
                    ("actor_name", "Grace"),
                    ("organization_name", "Acme"),
                    ("organization_link", "https://app/org/o1"),
                ]),
            )
            .unwrap();
        assert_eq!(content.subject, "You are now the owner of Acme");
        assert!(content.body.starts_with("Hi Ada, Grace made you"));
        assert!(content.body.ends_with("https://app/org/o1"));
    }

    #[test]
    fn missing_required_placeholder_fails() {
        let catalog = TemplateCatalog::builtin();
        let err = catalog
            .render(
                ORGANIZATION_OWNER_UPDATED_TEMPLATE,
                &values(&[("user_name", "Ada"), ("actor_name", " ")]),
            )
            .unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingPlaceholder {
                template: ORGANIZATION_OWNER_UPDATED_TEMPLATE.into(),
                placeholder: "actor_name".into(),
            }
        );
    }

    #[test]
    fn optional_placeholders_render_empty() {
        let catalog = TemplateCatalog::builtin();
        let content = catalog
            .render(
                WEBHOOK_DELIVERY_FAILED_TEMPLATE,
                &values(&[
                    ("event_type", "invoice.finalized"),
                    ("target_url", "https://t/hook"),
                    ("attempts", "3"),
                ]),
            )
            .unwrap();
        assert!(content.body.starts_with("Hi , delivering"));
    }

    #[test]
    fn unknown_template() {
        let catalog = TemplateCatalog::builtin();
        assert!(matches!(
            catalog.render("nope", &BTreeMap::new()),
            Err(TemplateError::UnknownTemplate(_))
        ));
    }

    #[test]
    fn request_carries_api_key_and_json() {
        let cfg = Notifications {
            endpoint: "http://localhost:9/send".into(),
            api_key: "k".into(),
            app_url: "http://app".into(),
        };
        let sender = HttpNotificationSender::new(&cfg, Duration::from_secs(1)).unwrap();
        let n = Notification {
            tenant: "t1".into(),
            channel: Channel::Email,
            template: "x".into(),
            recipient_email: "a@b.c".into(),
            recipient_name: String::new(),
            recipient_user_id: None,
            content: RenderedContent {
                subject: "s".into(),
                body: "b".into(),
            },
        };
        let req = sender.build_request(&n).unwrap();
        assert_eq!(req.headers()["X-Api-Key"], "k");
        assert_eq!(req.headers()["content-type"], "application/json");
    }
}
