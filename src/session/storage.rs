//! Named-entry storage for the persisted session.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use chrono::Utc;
use dashmap::DashMap;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::error::ApiResult;

/// Entry name the session is persisted under.
pub const SESSION_ENTRY: &str = "auth-storage";

/// Boxed future type for storage operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Key-value storage for client state that must survive restarts.
pub trait SessionStorage: Send + Sync {
    /// Load a named entry.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn load(&self, name: &str) -> StoreFuture<'_, ApiResult<Option<String>>>;

    /// Insert or replace a named entry.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn save(&self, name: &str, value: String) -> StoreFuture<'_, ApiResult<()>>;

    /// Remove a named entry. Removing a missing entry is not an error.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn remove(&self, name: &str) -> StoreFuture<'_, ApiResult<()>>;
}

/// `SQLite` implementation of session storage.
pub struct SqliteSessionStorage {
    conn: Connection,
    table: String,
}

impl SqliteSessionStorage {
    /// Table name for stored entries.
    pub const DEFAULT_TABLE: &'static str = "storage";

    /// Open (or create) the storage database at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> ApiResult<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        Self::init(conn).await
    }

    /// Open a throwaway in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn open_in_memory() -> ApiResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> ApiResult<Self> {
        let table = Self::DEFAULT_TABLE.to_string();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    name TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

impl SessionStorage for SqliteSessionStorage {
    fn load(&self, name: &str) -> StoreFuture<'_, ApiResult<Option<String>>> {
        let name = name.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            let value = self
                .conn
                .call(move |conn| {
                    let value = conn
                        .query_row(
                            &format!("SELECT value FROM {table} WHERE name = ?1"),
                            [name],
                            |row| row.get::<_, String>(0),
                        )
                        .optional()?;
                    Ok(value)
                })
                .await?;
            Ok(value)
        })
    }

    fn save(&self, name: &str, value: String) -> StoreFuture<'_, ApiResult<()>> {
        let name = name.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            let now_ms = Utc::now().timestamp_millis();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (name, value, updated_at) VALUES (?1, ?2, ?3)
                             ON CONFLICT(name) DO UPDATE SET
                                value = excluded.value,
                                updated_at = excluded.updated_at"
                        ),
                        rusqlite::params![name, value, now_ms],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn remove(&self, name: &str) -> StoreFuture<'_, ApiResult<()>> {
        let name = name.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(&format!("DELETE FROM {table} WHERE name = ?1"), [name])?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }
}

/// Process-local storage, lost on exit.
#[derive(Default)]
pub struct MemorySessionStorage {
    entries: DashMap<String, String>,
}

impl MemorySessionStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self, name: &str) -> StoreFuture<'_, ApiResult<Option<String>>> {
        let value = self.entries.get(name).map(|entry| entry.value().clone());
        Box::pin(async move { Ok(value) })
    }

    fn save(&self, name: &str, value: String) -> StoreFuture<'_, ApiResult<()>> {
        self.entries.insert(name.to_string(), value);
        Box::pin(async { Ok(()) })
    }

    fn remove(&self, name: &str) -> StoreFuture<'_, ApiResult<()>> {
        self.entries.remove(name);
        Box::pin(async { Ok(()) })
    }
}
