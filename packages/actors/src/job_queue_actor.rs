//! Job queue actor: a durable FIFO of job ids driven by its own timer.
//!
//! One activation (key [`JOB_QUEUE_KEY`]) owns the queued and processed id
//! lists. Every tick it dispatches the oldest queued job to the processor
//! registered for its type and records the outcome on the job's own actor.
//! A job id leaves the queued list only after its outcome has been recorded,
//! so a job interrupted by a restart is dispatched again.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::future::join_all;
use ractor::RpcReplyPort;
use serde::{Deserialize, Serialize};
use tenancy_core::{Job, JobEvent, JobId, JobRequest, JobStatus, TenantId};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::JobQueueConfig;
use crate::context::EntityContext;
use crate::entity::Entity;
use crate::error::{ActorError, ActorResult};
use crate::host::EntityHandle;
use crate::job_actor::{JobActor, job_key};
use crate::processor::{JobProcessor, ProcessorRegistry, ProcessorResult};

/// Key of the singleton queue activation.
pub const JOB_QUEUE_KEY: &str = "default";

const PROCESS_TIMER: &str = "process-next";

/// Durable state of the queue: ids only, job data lives on the job actors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobQueueState {
    /// Waiting ids in enqueue order.
    #[serde(default)]
    pub queued: VecDeque<JobId>,
    /// Finished ids in processing order.
    #[serde(default)]
    pub processed: Vec<JobId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobQueueStats {
    pub queued: usize,
    pub processed: usize,
}

/// Messages for the job queue actor.
pub enum JobQueueMessage {
    Enqueue {
        request: JobRequest,
        reply: RpcReplyPort<ActorResult<JobId>>,
    },
    /// Dispatch the oldest queued job now. Replies with its id, or `None`
    /// when the queue is empty.
    ProcessNext {
        reply: RpcReplyPort<ActorResult<Option<JobId>>>,
    },
    GetJobs {
        tenant_id: TenantId,
        reply: RpcReplyPort<ActorResult<Vec<Job>>>,
    },
    GetJob {
        job_id: JobId,
        reply: RpcReplyPort<ActorResult<Option<Job>>>,
    },
    Stats {
        reply: RpcReplyPort<JobQueueStats>,
    },
}

pub struct JobQueueActor {
    processors: Arc<ProcessorRegistry>,
    config: JobQueueConfig,
    events: broadcast::Sender<JobEvent>,
}

impl JobQueueActor {
    pub fn new(processors: Arc<ProcessorRegistry>, config: JobQueueConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            processors,
            config,
            events,
        }
    }

    /// Sender side of the event stream; call `subscribe()` on it for updates.
    pub fn events(&self) -> broadcast::Sender<JobEvent> {
        self.events.clone()
    }

    fn broadcast(&self, event: JobEvent) {
        tracing::debug!("{}", event.description());
        let _ = self.events.send(event);
    }

    async fn enqueue(&self, ctx: &mut EntityContext<Self>, request: JobRequest) -> ActorResult<JobId> {
        if request.job_type.trim().is_empty() {
            return Err(ActorError::Validation("job type must not be empty".into()));
        }

        let job = Job::new(JobId::new(), request, ctx.now());
        let job_ref = ctx
            .runtime()
            .get_or_activate::<JobActor>(job_key(job.id))
            .await?;
        job_ref.initialize(job.clone()).await?;

        ctx.state_or_insert_with(JobQueueState::default)
            .queued
            .push_back(job.id);
        ctx.write_state().await?;

        tracing::info!(job_id = %job.id, tenant_id = %job.tenant_id, job_type = %job.job_type, "job enqueued");
        let job_id = job.id;
        self.broadcast(JobEvent::JobEnqueued {
            job,
            timestamp: ctx.now(),
        });
        Ok(job_id)
    }

    async fn process_next(&self, ctx: &mut EntityContext<Self>) -> ActorResult<Option<JobId>> {
        let Some(job_id) = ctx.state().and_then(|s| s.queued.front().copied()) else {
            return Ok(None);
        };

        let job_ref = ctx
            .runtime()
            .get_or_activate::<JobActor>(job_key(job_id))
            .await?;

        let Some(job) = job_ref.get().await? else {
            tracing::error!(%job_id, "queued job has no status record, dropping it");
            if let Some(state) = ctx.state_mut() {
                state.queued.retain(|id| *id != job_id);
            }
            ctx.write_state().await?;
            return Ok(Some(job_id));
        };

        if job.status.is_terminal() {
            // Outcome recorded before the previous activation could move the id.
            self.finish(ctx, job_id).await?;
            return Ok(Some(job_id));
        }
        if job.status == JobStatus::Running {
            tracing::warn!(%job_id, "job was left running by an earlier activation, dispatching again");
        }

        let started = job_ref.update_status(JobStatus::Running).await?;
        tracing::info!(%job_id, job_type = %started.job_type, "job started");
        self.broadcast(JobEvent::JobStarted {
            job_id,
            tenant_id: started.tenant_id,
            job_type: started.job_type.clone(),
            timestamp: ctx.now(),
        });

        let outcome = match self.processors.resolve(&started.job_type) {
            Ok(processor) => self.run(processor, started, ctx.cancellation()).await,
            Err(e) => Err(e.to_string()),
        };

        let status = match &outcome {
            Ok(()) => JobStatus::Completed,
            Err(error) => JobStatus::Failed {
                error: error.clone(),
            },
        };
        let finished = job_ref.update_status(status).await?;
        self.finish(ctx, job_id).await?;

        match outcome {
            Ok(()) => {
                let duration_ms = finished.duration_ms().unwrap_or(0);
                tracing::info!(%job_id, duration_ms, "job completed");
                self.broadcast(JobEvent::JobCompleted {
                    job_id,
                    tenant_id: finished.tenant_id,
                    duration_ms,
                    timestamp: ctx.now(),
                });
            }
            Err(error) => {
                tracing::error!(%job_id, %error, "job failed");
                self.broadcast(JobEvent::JobFailed {
                    job_id,
                    tenant_id: finished.tenant_id,
                    error,
                    timestamp: ctx.now(),
                });
            }
        }
        Ok(Some(job_id))
    }

    /// Run a processor on its own task so a panic or a hang cannot take the
    /// queue down with it.
    async fn run(
        &self,
        processor: Arc<dyn JobProcessor>,
        job: Job,
        cancel: CancellationToken,
    ) -> ProcessorResult {
        let job_id = job.id;
        let task = tokio::spawn(processor.process(job, cancel));
        match tokio::time::timeout(self.config.job_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) if e.is_panic() => Err(format!("Job panicked: {}", panic_message(e))),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => {
                tracing::warn!(%job_id, timeout = ?self.config.job_timeout, "processor still running after timeout");
                Err("Job timed out".into())
            }
        }
    }

    /// Move an id from queued to processed and persist both lists.
    async fn finish(&self, ctx: &mut EntityContext<Self>, job_id: JobId) -> ActorResult<()> {
        let state = ctx.state_or_insert_with(JobQueueState::default);
        state.queued.retain(|id| *id != job_id);
        if !state.processed.contains(&job_id) {
            state.processed.push(job_id);
        }
        ctx.write_state().await
    }

    async fn get_jobs(&self, ctx: &EntityContext<Self>, tenant_id: TenantId) -> ActorResult<Vec<Job>> {
        let Some(state) = ctx.state() else {
            return Ok(Vec::new());
        };
        let ids: Vec<JobId> = state
            .processed
            .iter()
            .chain(state.queued.iter())
            .copied()
            .collect();

        let runtime = ctx.runtime().clone();
        let lookups = ids.into_iter().map(|id| {
            let runtime = runtime.clone();
            async move {
                runtime
                    .get_or_activate::<JobActor>(job_key(id))
                    .await?
                    .get()
                    .await
            }
        });

        let mut jobs = Vec::new();
        for job in join_all(lookups).await {
            if let Some(job) = job?
                && job.tenant_id == tenant_id
            {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }
}

impl Entity for JobQueueActor {
    const KIND: &'static str = "job-queue";
    const KEEP_ALIVE: bool = true;
    type State = JobQueueState;
    type Msg = JobQueueMessage;

    async fn on_activate(&self, ctx: &mut EntityContext<Self>) -> Result<(), ActorError> {
        let queued = ctx.state().map_or(0, |s| s.queued.len());
        let every = self.config.poll_interval;
        ctx.register_timer(PROCESS_TIMER, every, every);
        tracing::info!(key = %ctx.key(), queued, ?every, "job queue started");
        Ok(())
    }

    async fn handle(&self, ctx: &mut EntityContext<Self>, msg: Self::Msg) {
        match msg {
            JobQueueMessage::Enqueue { request, reply } => {
                let _ = reply.send(self.enqueue(ctx, request).await);
            }
            JobQueueMessage::ProcessNext { reply } => {
                let _ = reply.send(self.process_next(ctx).await);
            }
            JobQueueMessage::GetJobs { tenant_id, reply } => {
                let _ = reply.send(self.get_jobs(ctx, tenant_id).await);
            }
            JobQueueMessage::GetJob { job_id, reply } => {
                let known = ctx.state().is_some_and(|s| {
                    s.queued.contains(&job_id) || s.processed.contains(&job_id)
                });
                let result = if known {
                    match ctx.runtime().get_or_activate::<JobActor>(job_key(job_id)).await {
                        Ok(job_ref) => job_ref.get().await,
                        Err(e) => Err(e),
                    }
                } else {
                    Ok(None)
                };
                let _ = reply.send(result);
            }
            JobQueueMessage::Stats { reply } => {
                let stats = ctx
                    .state()
                    .map(|s| JobQueueStats {
                        queued: s.queued.len(),
                        processed: s.processed.len(),
                    })
                    .unwrap_or_default();
                let _ = reply.send(stats);
            }
        }
    }

    async fn on_timer(&self, ctx: &mut EntityContext<Self>, name: &str) {
        if name != PROCESS_TIMER {
            return;
        }
        // Errors stay inside the queue; the id is retried on the next tick.
        if let Err(e) = self.process_next(ctx).await {
            tracing::error!(error = %e, "job dispatch failed");
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl EntityHandle<JobQueueActor> {
    /// Queue a job and return its id without waiting for it to run.
    pub async fn enqueue(&self, request: JobRequest) -> ActorResult<JobId> {
        self.call(|reply| JobQueueMessage::Enqueue {
            request: request.clone(),
            reply,
        })
        .await?
    }

    pub async fn process_next(&self) -> ActorResult<Option<JobId>> {
        self.call(|reply| JobQueueMessage::ProcessNext { reply })
            .await?
    }

    /// Jobs of one tenant, in enqueue order.
    pub async fn get_jobs(&self, tenant_id: TenantId) -> ActorResult<Vec<Job>> {
        self.call(|reply| JobQueueMessage::GetJobs { tenant_id, reply })
            .await?
    }

    pub async fn get_job(&self, job_id: JobId) -> ActorResult<Option<Job>> {
        self.call(|reply| JobQueueMessage::GetJob { job_id, reply })
            .await?
    }

    pub async fn stats(&self) -> ActorResult<JobQueueStats> {
        self.call(|reply| JobQueueMessage::Stats { reply }).await
    }
}
