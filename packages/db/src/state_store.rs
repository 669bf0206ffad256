//! `StateStore` backed by the `actor_state` table.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use tenancy_core::{StateKey, StateStore, StoreError, StoreFuture, StoredState};
use ulid::Ulid;

use crate::{Database, DbError, get_db};

const TABLE: &str = "actor_state";

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct StateRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    kind: String,
    key: String,
    name: String,
    data: String,
    etag: String,
}

impl StateRecord {
    fn into_stored(self, key: &StateKey) -> Result<StoredState, StoreError> {
        let data = STANDARD
            .decode(self.data)
            .map_err(|e| StoreError::Backend(format!("corrupt state at {key}: {e}")))?;
        Ok(StoredState {
            data,
            etag: self.etag,
        })
    }
}

/// Actor state persisted in SurrealDB.
#[derive(Debug, Clone)]
pub struct SurrealStateStore {
    db: Database,
}

impl SurrealStateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store on the global connection set up by [`crate::init`].
    pub fn global() -> Result<Self, DbError> {
        Ok(Self::new(get_db()?.clone()))
    }

    async fn select(&self, key: &StateKey) -> Result<Option<StateRecord>, StoreError> {
        self.db
            .select((TABLE, key.to_string()))
            .await
            .map_err(backend)
    }

    async fn read_state(&self, key: &StateKey) -> Result<Option<StoredState>, StoreError> {
        let record = self.select(key).await?;
        tracing::debug!(state = %key, found = record.is_some(), "state read");
        record.map(|r| r.into_stored(key)).transpose()
    }

    async fn create(&self, key: &StateKey, data: Vec<u8>) -> Result<String, StoreError> {
        if let Some(existing) = self.select(key).await? {
            return Err(conflict(key, None, Some(existing.etag)));
        }

        let etag = Ulid::new().to_string();
        let record = StateRecord {
            id: None,
            kind: key.kind.clone(),
            key: key.key.clone(),
            name: key.name.clone(),
            data: STANDARD.encode(data),
            etag: etag.clone(),
        };
        let created: Result<Option<StateRecord>, _> =
            self.db.create((TABLE, key.to_string())).content(record).await;

        match created {
            Ok(Some(_)) => Ok(etag),
            Ok(None) => Err(StoreError::Backend(format!("create returned nothing for {key}"))),
            // Lost a race with another writer creating the same record.
            Err(e) => match self.select(key).await? {
                Some(existing) => Err(conflict(key, None, Some(existing.etag))),
                None => Err(backend(e)),
            },
        }
    }

    async fn replace(&self, key: &StateKey, data: Vec<u8>, expected: &str) -> Result<String, StoreError> {
        let etag = Ulid::new().to_string();
        let mut response = self
            .db
            .query("UPDATE type::thing($table, $id) SET data = $data, etag = $etag WHERE etag = $expected RETURN AFTER")
            .bind(("table", TABLE))
            .bind(("id", key.to_string()))
            .bind(("data", STANDARD.encode(data)))
            .bind(("etag", etag.clone()))
            .bind(("expected", expected.to_string()))
            .await
            .map_err(backend)?;
        let updated: Vec<StateRecord> = response.take(0).map_err(backend)?;

        if updated.is_empty() {
            let actual = self.select(key).await?.map(|r| r.etag);
            return Err(conflict(key, Some(expected.to_string()), actual));
        }
        Ok(etag)
    }
}

impl StateStore for SurrealStateStore {
    fn read<'a>(&'a self, key: &'a StateKey) -> StoreFuture<'a, Option<StoredState>> {
        Box::pin(self.read_state(key))
    }

    fn write<'a>(
        &'a self,
        key: &'a StateKey,
        data: Vec<u8>,
        expected: Option<&'a str>,
    ) -> StoreFuture<'a, String> {
        Box::pin(async move {
            let etag = match expected {
                None => self.create(key, data).await?,
                Some(expected) => self.replace(key, data, expected).await?,
            };
            tracing::debug!(state = %key, "state written");
            Ok(etag)
        })
    }

    fn name(&self) -> &'static str {
        "surrealdb"
    }
}

fn backend(err: surrealdb::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn conflict(key: &StateKey, expected: Option<String>, actual: Option<String>) -> StoreError {
    StoreError::Conflict {
        key: key.to_string(),
        expected,
        actual,
    }
}
