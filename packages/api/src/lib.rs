//! Service layer for the multi-tenant system.
//!
//! This crate sits between a transport (HTTP controllers, CLI) and the actor
//! runtime:
//! - [`TenantService`]: tenant creation, invites, roster management
//! - [`UserService`]: registration, login, password change and reset
//! - [`JobService`]: job submission, status queries and live events
//! - [`Notifier`]: outbound email contract, with a logging implementation
//! - [`init`]: builds the state store, runtime and services from [`AppConfig`]

mod config;
mod error;
mod init;
mod jobs;
mod notifier;
pub mod processors;
mod tenants;
mod users;

pub use config::{AppConfig, StateBackend};
pub use error::{ServiceError, ServiceResult};
pub use init::{App, init, shutdown};
pub use jobs::JobService;
pub use notifier::{LogNotifier, Notification, Notifier};
pub use tenants::TenantService;
pub use users::UserService;

// Re-export core types for convenience
pub use tenancy_core::{
    Job, JobEvent, JobId, JobStatus, TenantId, TenantMember, TenantRole, TenantState, UserId,
    UserProfile, UserState,
};
