//! Application configuration, aggregated from every crate's own config.

use std::str::FromStr;

use actors::{JobQueueConfig, RuntimeConfig, TenantConfig, UserConfig};
use db::DbConfig;
use storage::StorageConfig;

use crate::error::ServiceError;

/// Where actor state is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StateBackend {
    /// In-process only; state is lost on restart.
    #[default]
    Memory,
    /// The `actor_state` table in SurrealDB.
    Surreal,
    /// JSON objects in the configured object storage.
    Object,
}

impl StateBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            StateBackend::Memory => "memory",
            StateBackend::Surreal => "surreal",
            StateBackend::Object => "object",
        }
    }
}

impl FromStr for StateBackend {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StateBackend::Memory),
            "surreal" | "surrealdb" | "db" => Ok(StateBackend::Surreal),
            "object" | "object_store" => Ok(StateBackend::Object),
            other => Err(ServiceError::Config(format!(
                "unsupported STATE_BACKEND={other} (expected memory|surreal|object)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub state_backend: StateBackend,
    pub runtime: RuntimeConfig,
    pub tenant: TenantConfig,
    pub user: UserConfig,
    pub job_queue: JobQueueConfig,
    pub db: DbConfig,
    pub storage: StorageConfig,
}

impl Default for AppConfig {
    /// Everything in memory.
    fn default() -> Self {
        Self {
            state_backend: StateBackend::Memory,
            runtime: RuntimeConfig::default(),
            tenant: TenantConfig::default(),
            user: UserConfig::default(),
            job_queue: JobQueueConfig::default(),
            db: DbConfig::memory(),
            storage: StorageConfig::memory(),
        }
    }
}

impl AppConfig {
    /// Build the full configuration from environment variables.
    ///
    /// `STATE_BACKEND` selects the state store (`memory` by default); the
    /// rest is read by each component's own `from_env`.
    pub fn from_env() -> Result<Self, ServiceError> {
        let state_backend = match std::env::var("STATE_BACKEND") {
            Ok(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => StateBackend::default(),
        };

        Ok(Self {
            state_backend,
            runtime: RuntimeConfig::from_env()?,
            tenant: TenantConfig::from_env()?,
            user: UserConfig::from_env()?,
            job_queue: JobQueueConfig::from_env()?,
            db: DbConfig::from_env(),
            storage: StorageConfig::from_env()?,
        })
    }
}
