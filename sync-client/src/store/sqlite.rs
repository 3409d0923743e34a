//! SQLite storage backend.

use super::{ActionLog, LocalStore, StoreError};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use sync_types::{ActionId, Filter, Mutation, PendingAction, Record, RecordId};

/// SQLite-backed local store and action log.
///
/// Uses WAL mode for concurrent reads/writes and `synchronous = FULL` so
/// a mutating call that has returned cannot be lost by a crash.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file at the given path.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let path_str = path.to_str().ok_or_else(|| StoreError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let options = SqliteConnectOptions::from_str(path_str)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Full)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                record_id TEXT NOT NULL,
                fields TEXT NOT NULL,
                synced INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, record_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pending_actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                kind TEXT NOT NULL,
                record_id TEXT NOT NULL,
                payload TEXT,
                enqueued_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_pending_collection ON pending_actions(collection, id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    /// Column encoding of a mutation: (kind, record id, optional payload).
    fn encode_mutation(mutation: &Mutation) -> (&'static str, String, Option<String>) {
        let kind = mutation.kind().as_str();
        let record_id = mutation.target().to_string();
        let payload = match mutation {
            Mutation::Create { payload, .. } | Mutation::Update { payload, .. } => {
                Some(payload.to_string())
            }
            Mutation::Delete { .. } => None,
        };
        (kind, record_id, payload)
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn get(
        &self,
        collection: &str,
        record_id: &RecordId,
    ) -> Result<Option<Record>, StoreError> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT record_id, fields, synced
            FROM records
            WHERE collection = ?1 AND record_id = ?2
            "#,
        )
        .bind(collection)
        .bind(record_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        collection: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<Record>, StoreError> {
        let mut records = self.snapshot(collection).await?;
        if let Some(filter) = filter {
            records.retain(|record| filter.matches(record));
        }
        Ok(records)
    }

    async fn put(&self, collection: &str, record: &Record) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO records (collection, record_id, fields, synced, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(collection, record_id) DO UPDATE SET
                fields = excluded.fields,
                synced = excluded.synced,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(collection)
        .bind(record.id.to_string())
        .bind(record.fields.to_string())
        .bind(record.synced)
        .bind(Self::current_timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, collection: &str, record_id: &RecordId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM records WHERE collection = ?1 AND record_id = ?2")
            .bind(collection)
            .bind(record_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn snapshot(&self, collection: &str) -> Result<Vec<Record>, StoreError> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT record_id, fields, synced
            FROM records
            WHERE collection = ?1
            ORDER BY record_id
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| row.try_into()).collect()
    }
}

#[async_trait]
impl ActionLog for SqliteStore {
    async fn append(
        &self,
        collection: &str,
        mutation: &Mutation,
    ) -> Result<PendingAction, StoreError> {
        let (kind, record_id, payload) = Self::encode_mutation(mutation);
        let enqueued_at = Self::current_timestamp();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO pending_actions (collection, kind, record_id, payload, enqueued_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id
            "#,
        )
        .bind(collection)
        .bind(kind)
        .bind(record_id)
        .bind(payload)
        .bind(enqueued_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(PendingAction {
            id: ActionId::new(id as u64),
            collection: collection.to_string(),
            mutation: mutation.clone(),
            enqueued_at,
        })
    }

    async fn pending(&self) -> Result<Vec<PendingAction>, StoreError> {
        let rows = sqlx::query_as::<_, ActionRow>(
            r#"
            SELECT id, collection, kind, record_id, payload, enqueued_at
            FROM pending_actions
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| row.try_into()).collect()
    }

    async fn remove_action(&self, id: ActionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pending_actions WHERE id = ?1")
            .bind(id.value() as i64)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn resolve_placeholder(
        &self,
        id: ActionId,
        collection: &str,
        placeholder: &RecordId,
        authoritative: &RecordId,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM pending_actions WHERE id = ?1")
            .bind(id.value() as i64)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE pending_actions
            SET record_id = ?1
            WHERE collection = ?2 AND record_id = ?3
            "#,
        )
        .bind(authoritative.to_string())
        .bind(collection)
        .bind(placeholder.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_actions")
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pending_actions")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn last_synced_at(&self) -> Result<Option<i64>, StoreError> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT value FROM sync_meta WHERE key = 'last_synced_at'")
                .fetch_optional(&self.pool)
                .await?;

        Ok(value)
    }

    async fn set_last_synced_at(&self, at: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_meta (key, value) VALUES ('last_synced_at', ?1)
            ON CONFLICT(key) DO UPDATE SET value = ?1
            "#,
        )
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Internal row type for record queries.
#[derive(sqlx::FromRow)]
struct RecordRow {
    record_id: String,
    fields: String,
    synced: bool,
}

impl TryFrom<RecordRow> for Record {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let id: RecordId = row
            .record_id
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("record id: {e}")))?;
        let fields = serde_json::from_str(&row.fields)
            .map_err(|e| StoreError::Corrupt(format!("record fields: {e}")))?;
        Ok(Record {
            id,
            fields,
            synced: row.synced,
        })
    }
}

/// Internal row type for action queries.
#[derive(sqlx::FromRow)]
struct ActionRow {
    id: i64,
    collection: String,
    kind: String,
    record_id: String,
    payload: Option<String>,
    enqueued_at: i64,
}

impl TryFrom<ActionRow> for PendingAction {
    type Error = StoreError;

    fn try_from(row: ActionRow) -> Result<Self, Self::Error> {
        let kind: sync_types::MutationKind = row
            .kind
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("action kind: {e}")))?;
        let record_id: RecordId = row
            .record_id
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("action record id: {e}")))?;
        let payload = row
            .payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("action payload: {e}")))?;

        let mutation = match kind {
            sync_types::MutationKind::Create => Mutation::Create {
                local_id: record_id,
                payload: payload
                    .ok_or_else(|| StoreError::Corrupt("create without payload".into()))?,
            },
            sync_types::MutationKind::Update => Mutation::Update {
                record_id,
                payload: payload
                    .ok_or_else(|| StoreError::Corrupt("update without payload".into()))?,
            },
            sync_types::MutationKind::Delete => Mutation::Delete { record_id },
        };

        Ok(PendingAction {
            id: ActionId::new(row.id as u64),
            collection: row.collection,
            mutation,
            enqueued_at: row.enqueued_at,
        })
    }
}
