//! Job submission and status queries.

use actors::{ActorRuntime, EntityHandle, JOB_QUEUE_KEY, JobQueueActor, JobQueueStats};
use tenancy_core::{Job, JobEvent, JobId, JobRequest, TenantId};
use tokio::sync::broadcast;

use crate::error::ServiceResult;

#[derive(Clone)]
pub struct JobService {
    runtime: ActorRuntime,
    events: broadcast::Sender<JobEvent>,
}

impl JobService {
    pub fn new(runtime: ActorRuntime, events: broadcast::Sender<JobEvent>) -> Self {
        Self { runtime, events }
    }

    /// Queue a job. Returns as soon as the job is recorded.
    pub async fn enqueue(
        &self,
        tenant_id: TenantId,
        job_type: &str,
        payload: serde_json::Value,
    ) -> ServiceResult<JobId> {
        let request = JobRequest::new(job_type, tenant_id, payload);
        Ok(self.queue().await?.enqueue(request).await?)
    }

    pub async fn get_job(&self, job_id: JobId) -> ServiceResult<Option<Job>> {
        Ok(self.queue().await?.get_job(job_id).await?)
    }

    /// Every job of one tenant, finished ones first, each group in order.
    pub async fn list_jobs(&self, tenant_id: TenantId) -> ServiceResult<Vec<Job>> {
        Ok(self.queue().await?.get_jobs(tenant_id).await?)
    }

    pub async fn stats(&self) -> ServiceResult<JobQueueStats> {
        Ok(self.queue().await?.stats().await?)
    }

    /// Run the next queued job now instead of waiting for the timer.
    pub async fn process_next(&self) -> ServiceResult<Option<JobId>> {
        Ok(self.queue().await?.process_next().await?)
    }

    /// Live job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    async fn queue(&self) -> ServiceResult<EntityHandle<JobQueueActor>> {
        Ok(self
            .runtime
            .get_or_activate::<JobQueueActor>(JOB_QUEUE_KEY)
            .await?)
    }
}
