use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{MetadataRecord, MetadataStore, ProviderError};

/// SQLite-backed metadata store.
///
/// One row per `(namespace, item_key)` holding the attributes as a JSON
/// object. Several worker processes can point at the same database file and
/// resolve the same activity descriptors.
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    fn sqlx_to_provider_error(operation: &str, e: sqlx::Error) -> ProviderError {
        let error_msg = e.to_string();

        if error_msg.contains("database is locked") || error_msg.contains("SQLITE_BUSY") {
            return ProviderError::retryable(operation, format!("Database locked: {error_msg}"));
        }

        if error_msg.contains("UNIQUE constraint") || error_msg.contains("PRIMARY KEY") {
            return ProviderError::permanent(operation, format!("Constraint violation: {error_msg}"));
        }

        if error_msg.contains("connection") || error_msg.contains("timeout") {
            return ProviderError::retryable(operation, format!("Connection error: {error_msg}"));
        }

        ProviderError::retryable(operation, error_msg)
    }

    fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }

    /// Opens (creating if needed) the database at `database_url`, e.g.
    /// `sqlite:/var/lib/workers/metadata.db?mode=rwc`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema creation fails.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let is_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let mut options = SqlitePoolOptions::new();
        options = if is_memory {
            // Each connection to a private in-memory database is a new database.
            options
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            options.max_connections(5)
        };
        let pool = options
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if is_memory {
                        sqlx::query("PRAGMA journal_mode = MEMORY").execute(&mut *conn).await?;
                    } else {
                        sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                    }
                    sqlx::query("PRAGMA busy_timeout = 60000").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;

        Self::create_schema(&pool).await?;
        tracing::debug!(target: "taskchain::providers::sqlite", database_url, "metadata store opened");
        Ok(Self { pool })
    }

    /// Private in-memory database, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema creation fails.
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        Self::new("sqlite::memory:").await
    }

    async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metadata_namespaces (
                name TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metadata_items (
                namespace TEXT NOT NULL REFERENCES metadata_namespaces(name),
                item_key TEXT NOT NULL,
                attributes TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, item_key)
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn exists(&self, namespace: &str) -> Result<bool, ProviderError> {
        let row = sqlx::query("SELECT 1 FROM metadata_namespaces WHERE name = ?")
            .bind(namespace)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Self::sqlx_to_provider_error("exists", e))?;
        Ok(row.is_some())
    }

    async fn create(&self, namespace: &str) -> Result<(), ProviderError> {
        let inserted = sqlx::query("INSERT OR IGNORE INTO metadata_namespaces (name, created_at) VALUES (?, ?)")
            .bind(namespace)
            .bind(Self::now_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| Self::sqlx_to_provider_error("create", e))?;
        if inserted.rows_affected() == 0 {
            return Err(ProviderError::already_exists(
                "create",
                format!("namespace {namespace} already exists"),
            ));
        }
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<MetadataRecord>, ProviderError> {
        let row = sqlx::query("SELECT attributes FROM metadata_items WHERE namespace = ? AND item_key = ?")
            .bind(namespace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Self::sqlx_to_provider_error("get", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let attributes: String = row
            .try_get("attributes")
            .map_err(|e| Self::sqlx_to_provider_error("get", e))?;
        let record = serde_json::from_str(&attributes).map_err(|e| {
            ProviderError::permanent("get", format!("corrupt attributes for {namespace}/{key}: {e}"))
        })?;
        Ok(Some(record))
    }

    async fn put(&self, namespace: &str, key: &str, record: MetadataRecord) -> Result<(), ProviderError> {
        if !self.exists(namespace).await? {
            return Err(ProviderError::unknown_resource(
                "put",
                format!("unknown namespace {namespace}"),
            ));
        }
        let attributes = serde_json::to_string(&record)
            .map_err(|e| ProviderError::permanent("put", format!("Serialization error: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO metadata_items (namespace, item_key, attributes, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(namespace, item_key) DO UPDATE
            SET attributes = excluded.attributes, updated_at = excluded.updated_at
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(attributes)
        .bind(Self::now_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::sqlx_to_provider_error("put", e))?;
        Ok(())
    }
}
