//! Job processors and the registry the queue resolves them from.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tenancy_core::Job;
use tokio_util::sync::CancellationToken;

use crate::error::ActorError;

/// Result type for job processors. The error string becomes the job's
/// failure message verbatim.
pub type ProcessorResult = Result<(), String>;

/// Future type for async job processors.
pub type ProcessorFuture = Pin<Box<dyn Future<Output = ProcessorResult> + Send>>;

/// Trait for job processors.
///
/// Implement this trait to define how jobs of a specific type are processed.
/// Processors should check `cancel` and return early once it fires; they are
/// never aborted from outside.
pub trait JobProcessor: Send + Sync + 'static {
    /// The job type this processor handles.
    fn job_type(&self) -> &str;

    /// Process a job.
    fn process(&self, job: Job, cancel: CancellationToken) -> ProcessorFuture;
}

/// Maps job types to their processors.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn JobProcessor>>,
}

impl ProcessorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor. A later registration for the same type wins.
    pub fn register<P: JobProcessor>(&mut self, processor: P) -> &mut Self {
        let job_type = processor.job_type().to_string();
        self.processors.insert(job_type, Arc::new(processor));
        self
    }

    /// Look up the processor for a job type.
    pub fn resolve(&self, job_type: &str) -> Result<Arc<dyn JobProcessor>, ActorError> {
        self.processors
            .get(job_type)
            .cloned()
            .ok_or_else(|| ActorError::ProcessorResolution(job_type.to_string()))
    }

    /// Check if a processor exists for a job type.
    pub fn has_processor(&self, job_type: &str) -> bool {
        self.processors.contains_key(job_type)
    }

    /// All registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

/// A simple function-based job processor.
pub struct FnProcessor<F>
where
    F: Fn(Job, CancellationToken) -> ProcessorFuture + Send + Sync + 'static,
{
    job_type: String,
    process: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(Job, CancellationToken) -> ProcessorFuture + Send + Sync + 'static,
{
    /// Create a new function-based processor.
    pub fn new(job_type: impl Into<String>, process: F) -> Self {
        Self {
            job_type: job_type.into(),
            process,
        }
    }
}

impl<F> JobProcessor for FnProcessor<F>
where
    F: Fn(Job, CancellationToken) -> ProcessorFuture + Send + Sync + 'static,
{
    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn process(&self, job: Job, cancel: CancellationToken) -> ProcessorFuture {
        (self.process)(job, cancel)
    }
}
