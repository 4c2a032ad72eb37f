use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff policy for a webhook workflow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval_ms: u64,
    pub backoff_coefficient: f64,
    pub maximum_interval_ms: u64,
    /// 0 means retry forever.
    pub maximum_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1_000,
            backoff_coefficient: 2.0,
            maximum_interval_ms: 100_000,
            maximum_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `failed_attempts`-th failure (1-based).
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(64) as i32;
        let ms = self.initial_interval_ms as f64 * self.backoff_coefficient.max(1.0).powi(exponent);
        let capped = if self.maximum_interval_ms == 0 {
            ms
        } else {
            ms.min(self.maximum_interval_ms as f64)
        };
        Duration::from_millis(capped as u64)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.maximum_attempts != 0 && attempts >= self.maximum_attempts
    }
}

/// Who to alert when a delivery keeps failing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureNotice {
    pub recipient_email: String,
    #[serde(default)]
    pub recipient_name: String,
    pub event_type: String,
}

/// Everything needed to run one delivery, created once per triggering event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookDeliveryJob {
    /// Idempotency token; dispatching the same id twice yields one workflow.
    pub workflow_id: String,
    pub tenant: String,
    pub target_url: String,
    #[serde(default)]
    pub auth_header_name: String,
    #[serde(default)]
    pub auth_header_value: String,
    pub request_body: serde_json::Value,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default)]
    pub notify_after_attempts: u32,
    #[serde(default)]
    pub notify_on_failure: bool,
    #[serde(default)]
    pub notification_payload: Option<FailureNotice>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Delivered,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Delivered => "delivered",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "delivered" => Some(JobStatus::Delivered),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_delays() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_after(1), Duration::from_secs(1));
        assert_eq!(p.delay_after(2), Duration::from_secs(2));
        assert_eq!(p.delay_after(3), Duration::from_secs(4));
        assert_eq!(p.delay_after(12), Duration::from_secs(100));
    }

    #[test]
    fn delays_never_decrease() {
        let p = RetryPolicy {
            initial_interval_ms: 250,
            backoff_coefficient: 1.5,
            maximum_interval_ms: 10_000,
            maximum_attempts: 0,
        };
        let mut prev = Duration::ZERO;
        for n in 1..40 {
            let d = p.delay_after(n);
            assert!(d >= prev);
            prev = d;
        }
        assert_eq!(prev, Duration::from_secs(10));
    }

    #[test]
    fn zero_attempts_means_unlimited() {
        let p = RetryPolicy {
            maximum_attempts: 0,
            ..Default::default()
        };
        assert!(!p.exhausted(10_000));
        assert!(RetryPolicy::default().exhausted(3));
        assert!(!RetryPolicy::default().exhausted(2));
    }
}
