//! Dispatch worker - sends one queued message per job

use crate::engine::Engine;
use crate::error::CampaignResult;
use crate::events::DispatchEvent;
use crate::gateway::SendRequest;
use crate::queue::{JobId, QueuedJob, RetryOutcome};
use pulsecast_common::types::{CampaignId, MessageId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to a processed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Sent,
    /// Failed; another attempt is scheduled
    Retrying { attempt: u32 },
    /// Failed on its last attempt
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: JobId,
    pub campaign_id: CampaignId,
    pub message_id: MessageId,
    pub outcome: JobOutcome,
}

/// Dispatch Worker
pub struct DispatchWorker {
    engine: Engine,
}

impl DispatchWorker {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Poll the queue until cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        let poll_interval = self.engine.settings.poll_interval;
        info!("Dispatch worker started (poll interval: {:?})", poll_interval);

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let idle = match self.process_next().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!("Error processing dispatch queue: {}", e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }

        info!("Dispatch worker stopped");
    }

    /// Claim and process the earliest due job, if any
    pub async fn process_next(&self) -> CampaignResult<Option<JobReport>> {
        let Some(job) = self.engine.queue.claim_next().await? else {
            return Ok(None);
        };
        let outcome = self.process_job(&job).await?;
        Ok(Some(JobReport {
            job_id: job.id,
            campaign_id: job.payload.campaign_id,
            message_id: job.payload.message_id,
            outcome,
        }))
    }

    async fn process_job(&self, job: &QueuedJob) -> CampaignResult<JobOutcome> {
        let payload = &job.payload;
        debug!(
            job_id = %job.id,
            campaign_id = %payload.campaign_id,
            attempt = job.attempts_made + 1,
            "Sending message to {} via {}",
            payload.recipient,
            payload.instance_name
        );

        let request = SendRequest {
            tenant_id: payload.tenant_id,
            instance_name: payload.instance_name.clone(),
            recipient: payload.recipient.clone(),
            text: payload.text.clone(),
            media: payload.media(),
        };

        match self.engine.gateway.send(&request).await {
            Ok(receipt) => {
                self.record_sent(job, receipt.gateway_message_id.as_deref())
                    .await;
                self.engine.queue.complete(job.id).await?;
                Ok(JobOutcome::Sent)
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(
                    job_id = %job.id,
                    campaign_id = %payload.campaign_id,
                    "Send to {} failed: {}",
                    payload.recipient,
                    reason
                );
                self.engine.metrics.send_attempt_failed();

                if let Err(e) = self
                    .engine
                    .repos
                    .messages
                    .mark_failed(payload.message_id, &reason)
                    .await
                {
                    error!(message_id = %payload.message_id, "Failed to record send error: {}", e);
                }

                match self.engine.queue.fail(job.id, &reason).await? {
                    RetryOutcome::Retrying { attempt, retry_at } => {
                        debug!(job_id = %job.id, attempt, %retry_at, "Retry scheduled");
                        self.engine.events.publish(DispatchEvent::MessageFailed {
                            tenant_id: payload.tenant_id,
                            campaign_id: payload.campaign_id,
                            message_id: payload.message_id,
                            error: reason,
                            final_attempt: false,
                        });
                        Ok(JobOutcome::Retrying { attempt })
                    }
                    RetryOutcome::Exhausted => {
                        self.record_exhausted(job, reason).await;
                        Ok(JobOutcome::Failed)
                    }
                }
            }
        }
    }

    /// Bookkeeping after a successful send; errors are logged, never retried
    async fn record_sent(&self, job: &QueuedJob, gateway_message_id: Option<&str>) {
        let payload = &job.payload;
        let repos = &self.engine.repos;

        if let Err(e) = repos
            .messages
            .mark_sent(payload.message_id, gateway_message_id, self.engine.clock.now())
            .await
        {
            error!(message_id = %payload.message_id, "Failed to mark message sent: {}", e);
        }
        if let Err(e) = repos.campaigns.increment_sent(payload.campaign_id).await {
            error!(campaign_id = %payload.campaign_id, "Failed to count sent message: {}", e);
        }

        self.engine.metrics.message_sent();
        self.engine.events.publish(DispatchEvent::MessageSent {
            tenant_id: payload.tenant_id,
            campaign_id: payload.campaign_id,
            message_id: payload.message_id,
        });
        self.check_completion(payload.campaign_id).await;
    }

    async fn record_exhausted(&self, job: &QueuedJob, reason: String) {
        let payload = &job.payload;
        error!(
            job_id = %job.id,
            campaign_id = %payload.campaign_id,
            "Message to {} failed permanently after {} attempts",
            payload.recipient,
            job.max_attempts
        );

        if let Err(e) = self
            .engine
            .repos
            .campaigns
            .increment_failed(payload.campaign_id)
            .await
        {
            error!(campaign_id = %payload.campaign_id, "Failed to count failed message: {}", e);
        }

        self.engine.metrics.job_exhausted();
        self.engine.events.publish(DispatchEvent::MessageFailed {
            tenant_id: payload.tenant_id,
            campaign_id: payload.campaign_id,
            message_id: payload.message_id,
            error: reason,
            final_attempt: true,
        });
        self.check_completion(payload.campaign_id).await;
    }

    async fn check_completion(&self, campaign_id: CampaignId) {
        if let Err(e) = self.engine.controller().check_completion(campaign_id).await {
            error!(campaign_id = %campaign_id, "Completion check failed: {}", e);
        }
    }
}
