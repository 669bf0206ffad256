//! SurrealDB persistence for actor state.
//!
//! This crate provides the database connection and [`SurrealStateStore`],
//! a [`tenancy_core::StateStore`] that keeps every actor's state in the
//! `actor_state` table with etag-conditional writes.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
mod state_store;

pub use connection::{Database, DbConfig, DbError, get_db, init_db, try_get_db};
pub use schema::init_schema;
pub use state_store::SurrealStateStore;

/// Initialize the database with the given configuration.
///
/// This should be called once at application startup.
pub async fn init(config: DbConfig) -> Result<&'static Database, DbError> {
    let db = init_db(config).await?;
    init_schema(db).await?;
    Ok(db)
}
