//! Application bootstrap: state store, runtime, entities and services.

use std::sync::Arc;

use actors::{
    ActorRuntime, JOB_QUEUE_KEY, JobActor, JobQueueActor, TenantActor, UserActor, global_registry,
};
use storage::{ObjectStateStore, Storage};
use tenancy_core::{JobEvent, MemoryStateStore, StateStore};
use tokio::sync::broadcast;

use crate::config::{AppConfig, StateBackend};
use crate::error::ServiceResult;
use crate::jobs::JobService;
use crate::notifier::Notifier;
use crate::processors::default_processors;
use crate::tenants::TenantService;
use crate::users::UserService;

/// Everything a transport layer needs, wired together.
#[derive(Clone)]
pub struct App {
    pub runtime: ActorRuntime,
    pub storage: Storage,
    pub tenants: TenantService,
    pub users: UserService,
    pub jobs: JobService,
}

/// Build and start the application.
///
/// The runtime is also installed in the global registry so [`shutdown`] can
/// find it from a signal handler.
pub async fn init(config: AppConfig, notifier: Arc<dyn Notifier>) -> ServiceResult<App> {
    tracing::info!(state_backend = config.state_backend.as_str(), "initializing application");

    let storage = Storage::new(config.storage.clone()).await?;
    let store = state_store(&config, &storage).await?;
    tracing::info!(store = store.name(), storage = %storage.kind(), "persistence ready");

    let runtime = ActorRuntime::new(store, config.runtime.clone());
    let processors = default_processors(runtime.clone(), storage.clone());
    tracing::info!(job_types = ?processors.job_types(), "processors registered");

    let queue = JobQueueActor::new(Arc::new(processors), config.job_queue.clone());
    let events: broadcast::Sender<JobEvent> = queue.events();
    runtime
        .register(TenantActor::new(config.tenant.clone()))
        .register(UserActor::new(config.user.clone()))
        .register(JobActor)
        .register(queue);

    // Activate the queue so its timer starts without waiting for a caller.
    runtime.get_or_activate::<JobQueueActor>(JOB_QUEUE_KEY).await?;
    global_registry().register_runtime(runtime.clone());

    tracing::info!("application initialized");
    Ok(App {
        tenants: TenantService::new(runtime.clone(), notifier.clone()),
        users: UserService::new(runtime.clone(), notifier),
        jobs: JobService::new(runtime.clone(), events),
        runtime,
        storage,
    })
}

/// Flush and stop the runtime installed by [`init`]. Does nothing if there
/// is none.
pub async fn shutdown() {
    match global_registry().take_runtime() {
        Some(runtime) => runtime.shutdown().await,
        None => tracing::debug!("no runtime to shut down"),
    }
}

async fn state_store(config: &AppConfig, storage: &Storage) -> ServiceResult<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match config.state_backend {
        StateBackend::Memory => Arc::new(MemoryStateStore::new()),
        StateBackend::Surreal => {
            let db = db::init(config.db.clone()).await?;
            Arc::new(db::SurrealStateStore::new(db.clone()))
        }
        StateBackend::Object => Arc::new(ObjectStateStore::new(storage.clone())),
    };
    Ok(store)
}
