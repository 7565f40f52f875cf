//! `SQLite` block store.

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use super::model::{BlockId, BlockKind};
use super::store::BlockStore;
use crate::{Error, Result};

/// Block store backed by an `SQLite` database.
///
/// Clones share one connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        // One directory record per folder
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS folders (
                folder_id TEXT PRIMARY KEY,
                info BLOB NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Header and body block payloads
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS blocks (
                folder_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                block_id INTEGER NOT NULL,
                payload BLOB NOT NULL,
                PRIMARY KEY (folder_id, kind, block_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Lists the folders that have a directory record.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn folders(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT folder_id FROM folders ORDER BY folder_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("folder_id")).collect())
    }

    /// Removes a folder's directory record and every block it owns.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear_folder(&self, folder: &str) -> Result<()> {
        sqlx::query("DELETE FROM blocks WHERE folder_id = ?")
            .bind(folder)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM folders WHERE folder_id = ?")
            .bind(folder)
            .execute(&self.pool)
            .await?;
        tracing::info!(folder = %folder, "Cleared folder cache");
        Ok(())
    }
}

fn block_key(id: BlockId) -> Result<i64> {
    i64::try_from(id.0).map_err(|_| Error::Storage(format!("block id {id} out of range")))
}

impl BlockStore for SqliteStore {
    async fn load_folder(&self, folder: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT info FROM folders WHERE folder_id = ?")
            .bind(folder)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("info")))
    }

    async fn save_folder(&self, folder: &str, info: &[u8]) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO folders (folder_id, info, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(folder_id) DO UPDATE SET
                info = excluded.info,
                updated_at = excluded.updated_at
            ",
        )
        .bind(folder)
        .bind(info)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_block(
        &self,
        folder: &str,
        kind: BlockKind,
        id: BlockId,
    ) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query(
            "SELECT payload FROM blocks WHERE folder_id = ? AND kind = ? AND block_id = ?",
        )
        .bind(folder)
        .bind(kind.as_str())
        .bind(block_key(id)?)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("payload")))
    }

    async fn save_block(
        &self,
        folder: &str,
        kind: BlockKind,
        id: BlockId,
        payload: &[u8],
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO blocks (folder_id, kind, block_id, payload)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(folder_id, kind, block_id) DO UPDATE SET
                payload = excluded.payload
            ",
        )
        .bind(folder)
        .bind(kind.as_str())
        .bind(block_key(id)?)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_block(&self, folder: &str, kind: BlockKind, id: BlockId) -> Result<()> {
        sqlx::query("DELETE FROM blocks WHERE folder_id = ? AND kind = ? AND block_id = ?")
            .bind(folder)
            .bind(kind.as_str())
            .bind(block_key(id)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_folder_record_upsert() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.load_folder("INBOX").await.unwrap().is_none());

        store.save_folder("INBOX", b"one").await.unwrap();
        store.save_folder("INBOX", b"two").await.unwrap();

        let info = store.load_folder("INBOX").await.unwrap().unwrap();
        assert_eq!(info, b"two");
        assert_eq!(store.folders().await.unwrap(), vec!["INBOX".to_string()]);
    }

    #[tokio::test]
    async fn test_block_round_trip_and_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .save_block("INBOX", BlockKind::Header, BlockId(3), b"[1,2]")
            .await
            .unwrap();
        store
            .save_block("INBOX", BlockKind::Body, BlockId(3), b"[]")
            .await
            .unwrap();

        let header = store.load_block("INBOX", BlockKind::Header, BlockId(3)).await.unwrap();
        assert_eq!(header.as_deref(), Some(&b"[1,2]"[..]));

        store.delete_block("INBOX", BlockKind::Header, BlockId(3)).await.unwrap();
        assert!(
            store
                .load_block("INBOX", BlockKind::Header, BlockId(3))
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .load_block("INBOX", BlockKind::Body, BlockId(3))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_clear_folder() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.save_folder("Old", b"{}").await.unwrap();
        store
            .save_block("Old", BlockKind::Header, BlockId(0), b"[]")
            .await
            .unwrap();

        store.clear_folder("Old").await.unwrap();
        assert!(store.folders().await.unwrap().is_empty());
        assert!(
            store
                .load_block("Old", BlockKind::Header, BlockId(0))
                .await
                .unwrap()
                .is_none()
        );
    }
}
