//! Shared fixtures for engine tests

use crate::clock::{Clock, ManualClock};
use crate::engine::{Engine, EngineSettings, Repositories};
use crate::enqueuer::NewCampaign;
use crate::gateway::{Gateway, GatewayError, SendReceipt, SendRequest};
use crate::links::TrackedLinkShortener;
use crate::queue::{
    JobId, JobOptions, JobPayload, JobQueue, MemoryJobQueue, QueueStats, QueuedJob, RetryOutcome,
};
use crate::worker::JobReport;
use async_trait::async_trait;
use pulsecast_common::config::LinksConfig;
use pulsecast_common::types::{CampaignId, Contact, InstanceId, InstanceStatus, TenantId};
use pulsecast_common::{Error, Result};
use pulsecast_storage::models::{CreateInstance, Instance};
use pulsecast_storage::repository::InstanceRepository;
use pulsecast_storage::MemoryStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
enum Failure {
    Times(u32),
    Always,
}

/// Gateway that records requests and fails on demand per recipient
#[derive(Debug, Default)]
pub(crate) struct ScriptedGateway {
    failures: Mutex<HashMap<String, Failure>>,
    sent: Mutex<Vec<SendRequest>>,
}

impl ScriptedGateway {
    pub(crate) async fn fail_times(&self, recipient: &str, times: u32) {
        self.failures
            .lock()
            .await
            .insert(recipient.to_string(), Failure::Times(times));
    }

    pub(crate) async fn always_fail(&self, recipient: &str) {
        self.failures
            .lock()
            .await
            .insert(recipient.to_string(), Failure::Always);
    }

    /// Requests the gateway accepted
    pub(crate) async fn sent(&self) -> Vec<SendRequest> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn send(&self, request: &SendRequest) -> std::result::Result<SendReceipt, GatewayError> {
        let mut failures = self.failures.lock().await;
        match failures.get_mut(&request.recipient) {
            Some(Failure::Always) => {
                return Err(GatewayError::Rejected {
                    status: 400,
                    body: "number does not exist".to_string(),
                })
            }
            Some(Failure::Times(n)) if *n > 0 => {
                *n -= 1;
                return Err(GatewayError::Transport("connection reset".to_string()));
            }
            _ => {}
        }
        drop(failures);

        self.sent.lock().await.push(request.clone());
        Ok(SendReceipt {
            gateway_message_id: Some(format!("wamid.{}", Uuid::new_v4().simple())),
        })
    }
}

/// Memory queue that refuses submissions once its allowance is spent
///
/// Only jobs of `target` count against the allowance when one is set.
/// [`FlakyQueue::recover`] lets every later submission through.
pub(crate) struct FlakyQueue {
    inner: MemoryJobQueue,
    target: Option<CampaignId>,
    allowance: AtomicUsize,
    recovered: AtomicBool,
}

impl FlakyQueue {
    pub(crate) fn new(inner: MemoryJobQueue, allowance: usize) -> Self {
        Self {
            inner,
            target: None,
            allowance: AtomicUsize::new(allowance),
            recovered: AtomicBool::new(false),
        }
    }

    pub(crate) fn only_for(mut self, campaign_id: CampaignId) -> Self {
        self.target = Some(campaign_id);
        self
    }

    pub(crate) fn recover(&self) {
        self.recovered.store(true, Ordering::SeqCst);
    }

    fn admits(&self, payload: &JobPayload) -> bool {
        if self.recovered.load(Ordering::SeqCst) {
            return true;
        }
        if self.target.is_some_and(|id| id != payload.campaign_id) {
            return true;
        }
        self.allowance
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl JobQueue for FlakyQueue {
    async fn enqueue(&self, payload: JobPayload, options: JobOptions) -> Result<JobId> {
        if !self.admits(&payload) {
            return Err(Error::Queue("queue unavailable".to_string()));
        }
        self.inner.enqueue(payload, options).await
    }

    async fn list_delayed(&self) -> Result<Vec<QueuedJob>> {
        self.inner.list_delayed().await
    }

    async fn list_waiting(&self) -> Result<Vec<QueuedJob>> {
        self.inner.list_waiting().await
    }

    async fn list_for_campaign(&self, campaign_id: CampaignId) -> Result<Vec<QueuedJob>> {
        self.inner.list_for_campaign(campaign_id).await
    }

    async fn remove(&self, id: JobId) -> Result<bool> {
        self.inner.remove(id).await
    }

    async fn claim_next(&self) -> Result<Option<QueuedJob>> {
        self.inner.claim_next().await
    }

    async fn complete(&self, id: JobId) -> Result<()> {
        self.inner.complete(id).await
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<RetryOutcome> {
        self.inner.fail(id, error).await
    }

    async fn stats(&self) -> Result<QueueStats> {
        self.inner.stats().await
    }
}

/// An engine over in-memory stores with a manual clock
pub(crate) struct Harness {
    pub engine: Engine,
    pub store: MemoryStore,
    pub queue: MemoryJobQueue,
    pub clock: ManualClock,
    pub gateway: Arc<ScriptedGateway>,
    pub tenant_id: TenantId,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_gateway(Arc::new(ScriptedGateway::default())).await
    }

    pub async fn with_gateway(gateway: Arc<ScriptedGateway>) -> Self {
        let store = MemoryStore::new();
        let clock = ManualClock::default();
        let queue = MemoryJobQueue::new(Arc::new(clock.clone()));
        let engine = build_engine(&store, Arc::new(queue.clone()), gateway.clone(), &clock);

        Self {
            engine,
            store,
            queue,
            clock,
            gateway,
            tenant_id: Uuid::new_v4(),
        }
    }

    /// Same stores and clock, different queue
    pub fn engine_with_queue(&self, queue: Arc<dyn JobQueue>) -> Engine {
        build_engine(&self.store, queue, self.gateway.clone(), &self.clock)
    }

    /// A queue over this harness's jobs that accepts `allowance` submissions
    pub fn flaky_queue(&self, allowance: usize) -> FlakyQueue {
        FlakyQueue::new(self.queue.clone(), allowance)
    }

    pub async fn instance(&self, name: &str, status: InstanceStatus) -> Instance {
        self.store
            .create(CreateInstance {
                tenant_id: self.tenant_id,
                instance_name: name.to_string(),
                status,
            })
            .await
            .unwrap()
    }

    /// `contacts` recipients named `c0`, `c1`, ... with the default pacing
    pub fn new_campaign(&self, instance_ids: Vec<InstanceId>, contacts: usize) -> NewCampaign {
        NewCampaign {
            tenant_id: self.tenant_id,
            name: "Spring sale".to_string(),
            message: "Hi {{name}}".to_string(),
            templates: vec!["Hi {{name}}".to_string()],
            instance_ids,
            contacts: (0..contacts)
                .map(|i| {
                    Contact::new(format!("55000000000{:02}", i))
                        .with_variable("name", format!("c{}", i))
                })
                .collect(),
            ..Default::default()
        }
    }

    /// Process one due job
    pub async fn worker_step(&self) -> Option<JobReport> {
        self.engine.worker().process_next().await.unwrap()
    }

    /// Run the worker, jumping the clock forward, until the queue is empty
    pub async fn drain(&self) -> Vec<JobReport> {
        let worker = self.engine.worker();
        let mut reports = Vec::new();

        for _ in 0..10_000 {
            if let Some(report) = worker.process_next().await.unwrap() {
                reports.push(report);
                continue;
            }
            match self.queue.next_due_at().await {
                Some(at) if at > self.clock.now() => self.clock.set(at),
                Some(_) => {}
                None => return reports,
            }
        }
        panic!("queue did not drain");
    }
}

fn build_engine(
    store: &MemoryStore,
    queue: Arc<dyn JobQueue>,
    gateway: Arc<ScriptedGateway>,
    clock: &ManualClock,
) -> Engine {
    let repos = Repositories::memory(store);
    let shortener = Arc::new(TrackedLinkShortener::new(
        repos.links.clone(),
        &LinksConfig::default(),
    ));
    Engine::new(
        repos,
        queue,
        gateway,
        shortener,
        Arc::new(clock.clone()),
        EngineSettings::default(),
    )
    .unwrap()
}
