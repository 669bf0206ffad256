//! Entity actor runtime and the entities built on it.
//!
//! Every tenant, user and job is an addressable actor keyed by a stable id.
//! The runtime activates an actor on first use by loading its durable state,
//! runs every call and timer tick for that key one at a time through a
//! ractor mailbox, and flushes state when the actor is deactivated.
//!
//! # Architecture
//!
//! - `ActorRuntime` - activation table, one ractor actor per active key
//! - `TenantActor` - tenant profile, roster and invite tokens
//! - `UserActor` - credentials, profile and password-reset tokens
//! - `JobActor` - status record of one background job
//! - `JobQueueActor` - singleton queue that dispatches jobs on a timer
//!
//! # Usage
//!
//! ```ignore
//! use actors::{ActorRuntime, RuntimeConfig, TenantActor};
//!
//! let runtime = ActorRuntime::new(store, RuntimeConfig::default());
//! runtime.register(TenantActor::default());
//!
//! let tenant = runtime.get_or_activate::<TenantActor>(tenant_id.to_string()).await?;
//! let token = tenant.invite_user("a@x.com", TenantRole::Member, owner_id).await?;
//! ```

mod config;
mod context;
pub mod credentials;
mod entity;
mod error;
mod host;
mod job_actor;
mod job_queue_actor;
mod processor;
pub mod registry;
mod runtime;
mod tenant_actor;
mod user_actor;

pub use config::{
    ConfigError, JobQueueConfig, PasswordHashConfig, RuntimeConfig, TenantConfig, UserConfig,
};
pub use context::{EntityContext, TimerHandle};
pub use entity::{ActorId, DeactivateReason, Entity};
pub use error::{ActorError, ActorResult};
pub use host::{EntityHandle, HostMessage};
pub use job_actor::{JobActor, JobMessage, job_key};
pub use job_queue_actor::{
    JOB_QUEUE_KEY, JobQueueActor, JobQueueMessage, JobQueueState, JobQueueStats,
};
pub use processor::{FnProcessor, JobProcessor, ProcessorFuture, ProcessorRegistry, ProcessorResult};
pub use registry::{RuntimeRegistry, global_registry};
pub use runtime::ActorRuntime;
pub use tenant_actor::{TenantActor, TenantMessage};
pub use user_actor::{UserActor, UserMessage, UserRecord};

/// Re-export ractor types for convenience.
pub use ractor::RpcReplyPort;
/// Cancellation handed to job processors.
pub use tokio_util::sync::CancellationToken;
