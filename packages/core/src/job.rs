//! Job domain types for background work items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::TenantId;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current status of a job in its lifecycle.
///
/// `Queued -> Running -> Completed | Failed`. The error message only
/// exists on the `Failed` variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for the queue to dispatch it.
    #[default]
    Queued,
    /// Job has been handed to its processor.
    Running,
    /// Processor finished without error.
    Completed,
    /// Processor returned an error, timed out, panicked or could not be resolved.
    Failed { error: String },
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed { .. })
    }

    /// The failure message, if the job failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            JobStatus::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }
}

/// What a caller hands to the queue. The queue assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Type of job (used for routing to processors).
    pub job_type: String,
    /// Tenant the job runs on behalf of.
    pub tenant_id: TenantId,
    /// Opaque payload passed through to the processor.
    pub payload: serde_json::Value,
}

impl JobRequest {
    pub fn new(
        job_type: impl Into<String>,
        tenant_id: TenantId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            job_type: job_type.into(),
            tenant_id,
            payload,
        }
    }
}

/// A job represents a unit of background work tracked by its own actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Type of job (used for routing to processors).
    pub job_type: String,
    /// Tenant the job belongs to.
    pub tenant_id: TenantId,
    /// Job payload as JSON.
    pub payload: serde_json::Value,
    /// Current status.
    pub status: JobStatus,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the queue last dispatched the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new queued job from a request.
    pub fn new(id: JobId, request: JobRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            job_type: request.job_type,
            tenant_id: request.tenant_id,
            payload: request.payload,
            status: JobStatus::Queued,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.completed_at = None;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, error: impl Into<String>) {
        self.status = JobStatus::Failed {
            error: error.into(),
        };
        self.completed_at = Some(now);
    }

    /// Milliseconds between dispatch and completion, if both happened.
    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        u64::try_from((completed - started).num_milliseconds()).ok()
    }
}
