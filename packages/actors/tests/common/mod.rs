//! Shared setup for actor integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use actors::{
    ActorRuntime, JobActor, JobQueueActor, JobQueueConfig, PasswordHashConfig, ProcessorRegistry,
    RuntimeConfig, TenantActor, TenantConfig, UserActor, UserConfig,
};
use chrono::Utc;
use tenancy_core::{ManualClock, MemoryStateStore};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub struct Fixture {
    pub runtime: ActorRuntime,
    pub store: Arc<MemoryStateStore>,
    pub clock: Arc<ManualClock>,
}

/// Runtime over an in-memory store and a manual clock, no entities registered.
pub fn runtime(config: RuntimeConfig) -> Fixture {
    let store = Arc::new(MemoryStateStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let runtime = ActorRuntime::with_clock(store.clone(), config, clock.clone());
    Fixture {
        runtime,
        store,
        clock,
    }
}

/// Idle deactivation off, so activations live for the whole test.
pub fn quiet_config() -> RuntimeConfig {
    RuntimeConfig {
        idle_timeout: None,
        call_timeout: Some(Duration::from_secs(10)),
        ..RuntimeConfig::default()
    }
}

/// Cheap PBKDF2 so credential tests stay fast.
pub fn fast_user_config() -> UserConfig {
    UserConfig {
        password_hash: PasswordHashConfig {
            iterations: 1_000,
            ..PasswordHashConfig::default()
        },
        ..UserConfig::default()
    }
}

/// Tenant, user and job actors registered.
pub fn entities() -> Fixture {
    let fixture = runtime(quiet_config());
    fixture
        .runtime
        .register(TenantActor::new(TenantConfig::default()))
        .register(UserActor::new(fast_user_config()))
        .register(JobActor);
    fixture
}

/// Everything in [`entities`] plus a job queue whose timer never fires on its own.
pub fn with_queue(processors: ProcessorRegistry) -> (Fixture, tokio::sync::broadcast::Sender<tenancy_core::JobEvent>) {
    let fixture = entities();
    let queue = JobQueueActor::new(
        Arc::new(processors),
        JobQueueConfig {
            poll_interval: Duration::from_secs(3600),
            job_timeout: Duration::from_secs(5),
        },
    );
    let events = queue.events();
    fixture.runtime.register(queue);
    (fixture, events)
}
