//! libSQL state backend.
//!
//! The state document is stored as JSON in a single-row table. Schema changes go
//! through a versioned `_migrations` table; each save replaces the row inside a
//! transaction.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};

use crate::error::StateError;
use crate::state::PersistedState;
use crate::state::store::StateStore;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "state_document",
    sql: r#"
        CREATE TABLE IF NOT EXISTS dispatch_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            document TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    "#,
}];

/// State stored in a local libSQL database.
pub struct LibSqlStateStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStateStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StateError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StateError::Open(format!("Failed to create state directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StateError::Open(format!("Failed to open libSQL database: {e}")))?;
        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "State database opened");
        Ok(store)
    }

    /// In-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StateError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StateError::Open(format!("Failed to create in-memory database: {e}")))?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StateError> {
        let conn = db
            .connect()
            .map_err(|e| StateError::Open(format!("Failed to create connection: {e}")))?;
        run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

#[async_trait]
impl StateStore for LibSqlStateStore {
    fn name(&self) -> &str {
        "libsql"
    }

    async fn load(&self) -> Result<PersistedState, StateError> {
        let mut rows = self
            .conn
            .query("SELECT document FROM dispatch_state WHERE id = 1", ())
            .await
            .map_err(|e| StateError::Read(format!("Failed to query state: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| StateError::Read(format!("Failed to read state row: {e}")))?;

        let Some(row) = row else {
            info!("No stored state, starting fresh");
            return Ok(PersistedState::default());
        };

        let document: String = row
            .get(0)
            .map_err(|e| StateError::Read(format!("Failed to read state document: {e}")))?;

        match serde_json::from_str(&document) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(error = %e, "Stored state is corrupt, starting from defaults");
                Ok(PersistedState::default())
            }
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StateError> {
        let document = serde_json::to_string(state)?;
        let now = Utc::now().to_rfc3339();

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| StateError::Write(format!("Failed to begin transaction: {e}")))?;

        tx.execute(
            "INSERT INTO dispatch_state (id, document, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET document = excluded.document,
                                           updated_at = excluded.updated_at",
            params![document.as_str(), now.as_str()],
        )
        .await
        .map_err(|e| StateError::Write(format!("Failed to write state: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StateError::Write(format!("Failed to commit state: {e}")))?;

        debug!(bytes = document.len(), "State saved");
        Ok(())
    }
}

async fn run_migrations(conn: &Connection) -> Result<(), StateError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| StateError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                StateError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            conn.execute(
                "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
                params![migration.version, migration.name],
            )
            .await
            .map_err(|e| {
                StateError::Migration(format!(
                    "Failed to record migration V{}: {e}",
                    migration.version
                ))
            })?;
        }
    }

    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i64, StateError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StateError::Migration(format!("Failed to query migration version: {e}")))?;

    match rows
        .next()
        .await
        .map_err(|e| StateError::Migration(format!("Failed to read migration version: {e}")))?
    {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| StateError::Migration(format!("Failed to parse migration version: {e}"))),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DedupCategory;

    #[tokio::test]
    async fn empty_database_loads_defaults() {
        let store = LibSqlStateStore::new_memory().await.unwrap();
        assert_eq!(store.load().await.unwrap(), PersistedState::default());
    }

    #[tokio::test]
    async fn save_replaces_single_row() {
        let store = LibSqlStateStore::new_memory().await.unwrap();

        let mut state = PersistedState::default();
        state.dedup_sets.mark(DedupCategory::SummonResponses, "c1");
        store.save(&state).await.unwrap();

        state.milestone_watermarks.insert("p1".into(), 20);
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert!(loaded.dedup_sets.contains(DedupCategory::SummonResponses, "c1"));
        assert_eq!(loaded.milestone_watermarks["p1"], 20);

        let mut rows = store
            .conn
            .query("SELECT COUNT(*) FROM dispatch_state", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let store = LibSqlStateStore::new_memory().await.unwrap();
        run_migrations(&store.conn).await.unwrap();
        assert_eq!(get_current_version(&store.conn).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        {
            let store = LibSqlStateStore::new_local(&path).await.unwrap();
            let mut state = PersistedState::default();
            state.stats.runs = 7;
            store.save(&state).await.unwrap();
        }

        let store = LibSqlStateStore::new_local(&path).await.unwrap();
        assert_eq!(store.load().await.unwrap().stats.runs, 7);
    }
}
