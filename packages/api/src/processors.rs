//! Built-in job processors.

use std::time::Duration;

use actors::{
    ActorRuntime, CancellationToken, JobProcessor, ProcessorFuture, ProcessorRegistry, UserActor,
};
use serde_json::json;
use storage::Storage;
use tenancy_core::{Clock, Job, normalize_email};

/// Writes a user's public profile as JSON to `exports/{tenant}/{user}.json`.
///
/// Payload: `{"email": "..."}`. The user must belong to the job's tenant.
#[derive(Clone)]
pub struct UserDataExport {
    runtime: ActorRuntime,
    storage: Storage,
}

impl UserDataExport {
    pub const JOB_TYPE: &'static str = "user_data_export";

    pub fn new(runtime: ActorRuntime, storage: Storage) -> Self {
        Self { runtime, storage }
    }

    /// Object key of the export for one user.
    pub fn export_key(job: &Job, user_id: impl std::fmt::Display) -> String {
        format!("exports/{}/{}.json", job.tenant_id, user_id)
    }

    async fn run(self, job: Job, cancel: CancellationToken) -> Result<(), String> {
        let email = job.payload["email"]
            .as_str()
            .ok_or("payload is missing 'email'")?;
        let user = self
            .runtime
            .get_or_activate::<UserActor>(normalize_email(email))
            .await
            .map_err(|e| e.to_string())?
            .get_state()
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("user {email} not found"))?;
        if !user.tenant_ids.contains(&job.tenant_id) {
            return Err(format!("user {} is not a member of tenant {}", user.id, job.tenant_id));
        }
        if cancel.is_cancelled() {
            return Err("cancelled".into());
        }

        let document = json!({
            "exported_at": self.runtime.clock().now(),
            "job_id": job.id,
            "user": user,
        });
        let key = Self::export_key(&job, user.id);
        self.storage
            .put_json(&key, &document)
            .await
            .map_err(|e| e.to_string())?;
        tracing::info!(job_id = %job.id, %key, "user data exported");
        Ok(())
    }
}

impl JobProcessor for UserDataExport {
    fn job_type(&self) -> &str {
        Self::JOB_TYPE
    }

    fn process(&self, job: Job, cancel: CancellationToken) -> ProcessorFuture {
        Box::pin(self.clone().run(job, cancel))
    }
}

/// Periodic maintenance placeholder: walks `steps` steps (default 1) of
/// `step_ms` each and stops early when cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Housekeeping;

impl Housekeeping {
    pub const JOB_TYPE: &'static str = "housekeeping";
}

impl JobProcessor for Housekeeping {
    fn job_type(&self) -> &str {
        Self::JOB_TYPE
    }

    fn process(&self, job: Job, cancel: CancellationToken) -> ProcessorFuture {
        Box::pin(async move {
            let steps = job.payload["steps"].as_u64().unwrap_or(1);
            let step = Duration::from_millis(job.payload["step_ms"].as_u64().unwrap_or(0));
            for done in 0..steps {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!(job_id = %job.id, done, steps, "housekeeping cancelled");
                        return Err(format!("cancelled after {done} of {steps} steps"));
                    }
                    _ = tokio::time::sleep(step) => {}
                }
            }
            tracing::debug!(job_id = %job.id, steps, "housekeeping finished");
            Ok(())
        })
    }
}

/// Logs its payload and succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl Echo {
    pub const JOB_TYPE: &'static str = "echo";
}

impl JobProcessor for Echo {
    fn job_type(&self) -> &str {
        Self::JOB_TYPE
    }

    fn process(&self, job: Job, _cancel: CancellationToken) -> ProcessorFuture {
        Box::pin(async move {
            tracing::info!(job_id = %job.id, payload = %job.payload, "echo");
            Ok(())
        })
    }
}

/// Registry with every built-in processor.
pub fn default_processors(runtime: ActorRuntime, storage: Storage) -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();
    registry
        .register(UserDataExport::new(runtime, storage))
        .register(Housekeeping)
        .register(Echo);
    registry
}
