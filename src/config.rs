//! Configuration loader and validator for the sync relay.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::model::{EntityKind, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub sync: SyncConfig,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    pub webhooks: Webhooks,
    pub notifications: Notifications,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
}

/// Exponential backoff knobs shared by the visibility poller and the
/// command retry loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backoff {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    pub accepted_external_systems: Vec<String>,
    pub default_concurrency: usize,
    #[serde(default)]
    pub concurrency: BTreeMap<EntityKind, usize>,
    pub per_item_timeout_ms: u64,
    pub batch_timeout_ceiling_ms: u64,
    pub external_system_cache_ttl_secs: u64,
    pub visibility_poll: Backoff,
    pub command_retry: Backoff,
    #[serde(default)]
    pub personal_email_domains: Vec<String>,
}

/// One consumer group reading the event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub group_name: String,
    pub pool_size: usize,
    #[serde(default)]
    pub ignore_events: bool,
    /// Event types routed to handlers; empty routes every registered type.
    #[serde(default)]
    pub event_types: Vec<String>,
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
}

fn default_handler_timeout_secs() -> u64 {
    25
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Webhooks {
    #[serde(default)]
    pub default_retry_policy: RetryPolicy,
    pub request_timeout_ms: u64,
    pub user_agent: String,
    /// How long an engine reserves a job it is attempting.
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_lease_ms() -> u64 {
    60_000
}

fn default_max_in_flight() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notifications {
    pub endpoint: String,
    pub api_key: String,
    /// Base URL used to build links inside notifications.
    pub app_url: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/relay.db", self.app.data_dir))
    }
}

impl SyncConfig {
    pub fn concurrency_for(&self, kind: EntityKind) -> usize {
        self.concurrency
            .get(&kind)
            .copied()
            .unwrap_or(self.default_concurrency)
            .max(1)
    }

    pub fn per_item_timeout(&self) -> Duration {
        Duration::from_millis(self.per_item_timeout_ms)
    }

    pub fn batch_timeout_ceiling(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ceiling_ms)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }

    let s = &cfg.sync;
    if s.accepted_external_systems.iter().any(|e| e.trim().is_empty()) {
        return Err(ConfigError::Invalid(
            "sync.accepted_external_systems must not contain blank entries",
        ));
    }
    if s.default_concurrency == 0 || s.concurrency.values().any(|c| *c == 0) {
        return Err(ConfigError::Invalid("sync concurrency limits must be > 0"));
    }
    if s.per_item_timeout_ms == 0 || s.batch_timeout_ceiling_ms == 0 {
        return Err(ConfigError::Invalid("sync timeouts must be > 0"));
    }
    if s.visibility_poll.attempts == 0 {
        return Err(ConfigError::Invalid("sync.visibility_poll.attempts must be > 0"));
    }
    if s.command_retry.attempts == 0 {
        return Err(ConfigError::Invalid("sync.command_retry.attempts must be > 0"));
    }

    for sub in &cfg.subscriptions {
        if sub.group_name.trim().is_empty() {
            return Err(ConfigError::Invalid("subscriptions[].group_name must be non-empty"));
        }
        if sub.pool_size == 0 {
            return Err(ConfigError::Invalid("subscriptions[].pool_size must be > 0"));
        }
        if sub.handler_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "subscriptions[].handler_timeout_secs must be > 0",
            ));
        }
    }

    let p = &cfg.webhooks.default_retry_policy;
    if p.initial_interval_ms == 0 {
        return Err(ConfigError::Invalid(
            "webhooks.default_retry_policy.initial_interval_ms must be > 0",
        ));
    }
    if p.backoff_coefficient < 1.0 {
        return Err(ConfigError::Invalid(
            "webhooks.default_retry_policy.backoff_coefficient must be >= 1",
        ));
    }
    if cfg.webhooks.request_timeout_ms == 0 {
        return Err(ConfigError::Invalid("webhooks.request_timeout_ms must be > 0"));
    }
    // A lease covers one delivery plus one failure notification.
    if cfg.webhooks.lease_ms <= cfg.webhooks.request_timeout_ms.saturating_mul(2) {
        return Err(ConfigError::Invalid(
            "webhooks.lease_ms must exceed twice webhooks.request_timeout_ms",
        ));
    }
    if cfg.webhooks.max_in_flight == 0 {
        return Err(ConfigError::Invalid("webhooks.max_in_flight must be > 0"));
    }

    if cfg.notifications.endpoint.trim().is_empty() {
        return Err(ConfigError::Invalid("notifications.endpoint must be non-empty"));
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 500

sync:
  accepted_external_systems:
    - hubspot
    - salesforce
    - zendesk_support
    - slack
    - stripe
  default_concurrency: 4
  concurrency:
    organization: 2
    issue: 8
  per_item_timeout_ms: 2000
  batch_timeout_ceiling_ms: 300000
  external_system_cache_ttl_secs: 600
  visibility_poll:
    attempts: 7
    base_delay_ms: 100
    max_delay_ms: 2000
  command_retry:
    attempts: 3
    base_delay_ms: 200
    max_delay_ms: 2000
  personal_email_domains:
    - proton.me

subscriptions:
  - group_name: notifications
    pool_size: 2
    handler_timeout_secs: 25
    event_types:
      - OrganizationOwnerUpdated
      - UserUpserted
      - OrganizationUpserted
  - group_name: invoice-webhooks
    pool_size: 4
    event_types:
      - InvoiceFinalized
      - InvoicePaid

webhooks:
  default_retry_policy:
    initial_interval_ms: 1000
    backoff_coefficient: 2.0
    maximum_interval_ms: 100000
    maximum_attempts: 3
  request_timeout_ms: 10000
  user_agent: "syncrelay/0.1"
  lease_ms: 60000
  max_in_flight: 4

notifications:
  endpoint: "https://notifications.example.com/v1/send"
  api_key: "YOUR_NOTIFICATION_API_KEY"
  app_url: "https://app.example.com"
"#
}
