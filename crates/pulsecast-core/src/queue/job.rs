//! Job payload and retry options

use chrono::{DateTime, Utc};
use pulsecast_common::config::DispatchConfig;
use pulsecast_common::types::{CampaignId, MediaRef, MessageId, TenantId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for queued jobs
pub type JobId = Uuid;

/// Everything the worker needs to send one message without further lookups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub instance_name: String,
    pub recipient: String,
    pub text: String,
    pub campaign_id: CampaignId,
    pub message_id: MessageId,
    pub tenant_id: TenantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl JobPayload {
    pub fn media(&self) -> Option<MediaRef> {
        self.media_url.as_ref().map(|url| MediaRef {
            url: url.clone(),
            media_type: self.media_type.clone(),
        })
    }
}

/// Exponential retry backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Self { base }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry - 1)`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << exponent)
    }
}

/// Per-job submission options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Offset from submission before the job becomes due
    pub delay: Duration,
    /// Attempts including the first
    pub attempts: u32,
    pub backoff: Backoff,
}

impl JobOptions {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            delay: Duration::ZERO,
            attempts: config.max_attempts.max(1),
            backoff: Backoff::exponential(Duration::from_millis(config.backoff_base_ms)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            attempts: 3,
            backoff: Backoff::exponential(Duration::from_secs(2)),
        }
    }
}

/// A job as seen through queue introspection
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub id: JobId,
    pub payload: JobPayload,
    /// Attempts already made
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub due_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Result of recording a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Rescheduled; `attempt` is the number of the next attempt
    Retrying {
        attempt: u32,
        retry_at: DateTime<Utc>,
    },
    /// No attempts left; the job is permanently failed
    Exhausted,
}

/// Decide what happens after attempt `attempts_made` failed
pub(crate) fn next_attempt(
    attempts_made: u32,
    max_attempts: u32,
    backoff: Backoff,
    now: DateTime<Utc>,
) -> RetryOutcome {
    if attempts_made >= max_attempts {
        return RetryOutcome::Exhausted;
    }
    let delay = backoff.delay_for(attempts_made);
    RetryOutcome::Retrying {
        attempt: attempts_made + 1,
        retry_at: now + to_chrono(delay),
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_backoff_doubles_from_base() {
        let backoff = Backoff::exponential(Duration::from_secs(2));
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(4));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_next_attempt_respects_limit() {
        let now = Utc::now();
        let backoff = JobOptions::default().backoff;

        assert_eq!(
            next_attempt(1, 3, backoff, now),
            RetryOutcome::Retrying {
                attempt: 2,
                retry_at: now + chrono::Duration::seconds(2)
            }
        );
        assert_eq!(
            next_attempt(2, 3, backoff, now),
            RetryOutcome::Retrying {
                attempt: 3,
                retry_at: now + chrono::Duration::seconds(4)
            }
        );
        assert_eq!(next_attempt(3, 3, backoff, now), RetryOutcome::Exhausted);
    }

    #[test]
    fn test_payload_wire_shape() {
        let payload = JobPayload {
            instance_name: "sales-1".to_string(),
            recipient: "5511999990000".to_string(),
            text: "Hi".to_string(),
            campaign_id: Uuid::nil(),
            message_id: Uuid::nil(),
            tenant_id: Uuid::nil(),
            media_url: None,
            media_type: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["instanceName"], "sales-1");
        assert!(value.get("mediaUrl").is_none());
        assert_eq!(payload.media(), None);
    }

    #[test]
    fn test_options_from_config() {
        let options = JobOptions::from_config(&DispatchConfig::default())
            .with_delay(Duration::from_secs(12));
        assert_eq!(options.attempts, 3);
        assert_eq!(options.backoff.base(), Duration::from_secs(2));
        assert_eq!(options.delay, Duration::from_secs(12));
    }
}
