//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("initializing database schema");
    db.query(ACTOR_STATE_SCHEMA).await?.check()?;
    tracing::info!("database schema initialized");
    Ok(())
}

/// One row per (kind, key, state name). The record id is `kind/key/name`.
const ACTOR_STATE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS actor_state SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS kind ON actor_state TYPE string;
DEFINE FIELD IF NOT EXISTS key ON actor_state TYPE string;
DEFINE FIELD IF NOT EXISTS name ON actor_state TYPE string;
-- Opaque state bytes, base64 encoded.
DEFINE FIELD IF NOT EXISTS data ON actor_state TYPE string;
DEFINE FIELD IF NOT EXISTS etag ON actor_state TYPE string;
DEFINE FIELD IF NOT EXISTS updated_at ON actor_state TYPE datetime VALUE time::now();

DEFINE INDEX IF NOT EXISTS actor_state_kind ON actor_state FIELDS kind;
"#;
