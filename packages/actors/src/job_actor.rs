//! Per-job status record, keyed by job id.

use ractor::RpcReplyPort;
use tenancy_core::{Job, JobId, JobStatus};

use crate::context::EntityContext;
use crate::entity::Entity;
use crate::error::{ActorError, ActorResult};
use crate::host::EntityHandle;

/// Messages for the job actor.
pub enum JobMessage {
    /// Store the job. A second initialize for the same id is a no-op.
    Initialize {
        job: Box<Job>,
        reply: RpcReplyPort<ActorResult<()>>,
    },
    Get {
        reply: RpcReplyPort<Option<Job>>,
    },
    UpdateStatus {
        status: JobStatus,
        reply: RpcReplyPort<ActorResult<Job>>,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JobActor;

impl Entity for JobActor {
    const KIND: &'static str = "job";
    type State = Job;
    type Msg = JobMessage;

    async fn handle(&self, ctx: &mut EntityContext<Self>, msg: Self::Msg) {
        match msg {
            JobMessage::Initialize { job, reply } => {
                let result = if ctx.state().is_some() {
                    Ok(())
                } else if job.id.to_string() != ctx.key() {
                    Err(ActorError::Validation(format!(
                        "job id {} does not match actor key {}",
                        job.id,
                        ctx.key()
                    )))
                } else {
                    ctx.set_state(*job);
                    ctx.write_state().await
                };
                let _ = reply.send(result);
            }

            JobMessage::Get { reply } => {
                let _ = reply.send(ctx.state().cloned());
            }

            JobMessage::UpdateStatus { status, reply } => {
                let now = ctx.now();
                let key = ctx.key().to_string();
                let Some(job) = ctx.state_mut() else {
                    let _ = reply.send(Err(ActorError::NotFound(format!("job {key}"))));
                    return;
                };
                match status {
                    JobStatus::Queued => {
                        job.status = JobStatus::Queued;
                        job.started_at = None;
                        job.completed_at = None;
                    }
                    JobStatus::Running => job.mark_running(now),
                    JobStatus::Completed => job.mark_completed(now),
                    JobStatus::Failed { error } => job.mark_failed(now, error),
                }
                let updated = job.clone();
                tracing::debug!(job_id = %key, status = updated.status.as_str(), "job status updated");
                let result = ctx.write_state().await.map(|_| updated);
                let _ = reply.send(result);
            }
        }
    }
}

impl EntityHandle<JobActor> {
    pub async fn initialize(&self, job: Job) -> ActorResult<()> {
        self.call(|reply| JobMessage::Initialize {
            job: Box::new(job.clone()),
            reply,
        })
        .await?
    }

    pub async fn get(&self) -> ActorResult<Option<Job>> {
        self.call(|reply| JobMessage::Get { reply }).await
    }

    pub async fn update_status(&self, status: JobStatus) -> ActorResult<Job> {
        self.call(|reply| JobMessage::UpdateStatus {
            status: status.clone(),
            reply,
        })
        .await?
    }
}

/// Actor key of a job.
pub fn job_key(job_id: JobId) -> String {
    job_id.to_string()
}
