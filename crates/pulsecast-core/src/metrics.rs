//! Prometheus metrics for the dispatch engine

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use pulsecast_common::types::CampaignStatus;
use pulsecast_common::{Error, Result};

/// Engine counters, registered on their own registry
#[derive(Clone)]
pub struct DispatchMetrics {
    registry: Registry,
    messages_sent: IntCounter,
    send_attempts_failed: IntCounter,
    jobs_exhausted: IntCounter,
    campaign_transitions: IntCounterVec,
}

fn metrics_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

impl DispatchMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("pulsecast".to_string()), None).map_err(metrics_err)?;

        let messages_sent = IntCounter::with_opts(Opts::new(
            "messages_sent_total",
            "Messages accepted by the gateway",
        ))
        .map_err(metrics_err)?;
        let send_attempts_failed = IntCounter::with_opts(Opts::new(
            "send_attempts_failed_total",
            "Send attempts that raised an error",
        ))
        .map_err(metrics_err)?;
        let jobs_exhausted = IntCounter::with_opts(Opts::new(
            "jobs_exhausted_total",
            "Jobs that failed on their last attempt",
        ))
        .map_err(metrics_err)?;
        let campaign_transitions = IntCounterVec::new(
            Opts::new("campaign_transitions_total", "Campaign status transitions"),
            &["status"],
        )
        .map_err(metrics_err)?;

        registry
            .register(Box::new(messages_sent.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(send_attempts_failed.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(jobs_exhausted.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(campaign_transitions.clone()))
            .map_err(metrics_err)?;

        Ok(Self {
            registry,
            messages_sent,
            send_attempts_failed,
            jobs_exhausted,
            campaign_transitions,
        })
    }

    pub fn message_sent(&self) {
        self.messages_sent.inc();
    }

    pub fn send_attempt_failed(&self) {
        self.send_attempts_failed.inc();
    }

    pub fn job_exhausted(&self) {
        self.jobs_exhausted.inc();
    }

    pub fn campaign_transition(&self, status: CampaignStatus) {
        self.campaign_transitions
            .with_label_values(&[status.as_str()])
            .inc();
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_err)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        let metrics = DispatchMetrics::new().unwrap();
        metrics.message_sent();
        metrics.message_sent();
        metrics.campaign_transition(CampaignStatus::Completed);

        let text = metrics.render().unwrap();
        assert!(text.contains("pulsecast_messages_sent_total 2"));
        assert!(text.contains("pulsecast_campaign_transitions_total{status=\"COMPLETED\"} 1"));
    }
}
