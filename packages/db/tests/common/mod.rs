use std::sync::LazyLock;

use tokio::sync::{Mutex, MutexGuard};

use db::{DbConfig, DbError, SurrealStateStore};

static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Serialize tests on the shared in-memory database and start from an empty table.
pub async fn setup_store() -> Result<(MutexGuard<'static, ()>, SurrealStateStore), DbError> {
    let guard = TEST_LOCK.lock().await;
    let db_conn = db::init(DbConfig::memory()).await?;
    db_conn.query("DELETE actor_state;").await?.check()?;
    Ok((guard, SurrealStateStore::global()?))
}
