//! Core domain types for the multi-tenant entity system.
//!
//! This crate contains shared types used across all packages:
//! - Tenant, membership and invite types
//! - User identity and public profile types
//! - Job and JobStatus for background work items
//! - Events for real-time job updates
//! - The durable `StateStore` contract and an in-memory implementation
//! - A `Clock` abstraction so expiry logic can be driven in tests

mod clock;
mod events;
mod job;
mod store;
mod tenant;
mod user;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::JobEvent;
pub use job::{Job, JobId, JobRequest, JobStatus};
pub use store::{MemoryStateStore, StateKey, StateStore, StoreError, StoreFuture, StoredState};
pub use tenant::{
    Membership, TenantId, TenantInvite, TenantMember, TenantRole, TenantSettings, TenantState,
    validate_subdomain,
};
pub use user::{UserId, UserProfile, UserState, emails_match, normalize_email, validate_email};
