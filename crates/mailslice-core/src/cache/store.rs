//! Persistent store boundary for folder caches.
//!
//! A store is a per-folder namespace holding one small directory record and
//! any number of block payloads. Payloads are opaque bytes; encoding them is
//! the folder cache's business.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::model::{BlockId, BlockKind};
use crate::{Error, Result};

/// Storage for folder directory records and block payloads.
#[allow(async_fn_in_trait)]
pub trait BlockStore {
    /// Loads a folder's directory record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn load_folder(&self, folder: &str) -> Result<Option<Vec<u8>>>;

    /// Saves a folder's directory record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    async fn save_folder(&self, folder: &str, info: &[u8]) -> Result<()>;

    /// Loads a block payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn load_block(&self, folder: &str, kind: BlockKind, id: BlockId)
    -> Result<Option<Vec<u8>>>;

    /// Saves a block payload, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    async fn save_block(
        &self,
        folder: &str,
        kind: BlockKind,
        id: BlockId,
        payload: &[u8],
    ) -> Result<()>;

    /// Deletes a block payload. Deleting a missing block is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    async fn delete_block(&self, folder: &str, kind: BlockKind, id: BlockId) -> Result<()>;
}

impl<T: BlockStore> BlockStore for Arc<T> {
    async fn load_folder(&self, folder: &str) -> Result<Option<Vec<u8>>> {
        (**self).load_folder(folder).await
    }

    async fn save_folder(&self, folder: &str, info: &[u8]) -> Result<()> {
        (**self).save_folder(folder, info).await
    }

    async fn load_block(
        &self,
        folder: &str,
        kind: BlockKind,
        id: BlockId,
    ) -> Result<Option<Vec<u8>>> {
        (**self).load_block(folder, kind, id).await
    }

    async fn save_block(
        &self,
        folder: &str,
        kind: BlockKind,
        id: BlockId,
        payload: &[u8],
    ) -> Result<()> {
        (**self).save_block(folder, kind, id, payload).await
    }

    async fn delete_block(&self, folder: &str, kind: BlockKind, id: BlockId) -> Result<()> {
        (**self).delete_block(folder, kind, id).await
    }
}

type BlockKey = (String, BlockKind, BlockId);

/// In-process store.
///
/// Counts block loads so tests can observe coalescing, and can be told to
/// reject writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    folders: Mutex<HashMap<String, Vec<u8>>>,
    blocks: Mutex<HashMap<BlockKey, Vec<u8>>>,
    block_loads: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of block loads served so far.
    #[must_use]
    pub fn block_loads(&self) -> usize {
        self.block_loads.load(Ordering::SeqCst)
    }

    /// Number of stored block payloads.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Makes every subsequent write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("store is read-only".into()));
        }
        Ok(())
    }
}

impl BlockStore for MemoryStore {
    async fn load_folder(&self, folder: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .folders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(folder)
            .cloned())
    }

    async fn save_folder(&self, folder: &str, info: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.folders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(folder.to_string(), info.to_vec());
        Ok(())
    }

    async fn load_block(
        &self,
        folder: &str,
        kind: BlockKind,
        id: BlockId,
    ) -> Result<Option<Vec<u8>>> {
        self.block_loads.fetch_add(1, Ordering::SeqCst);
        // Suspend like a real read would, so concurrent callers interleave.
        tokio::task::yield_now().await;
        Ok(self
            .blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(folder.to_string(), kind, id))
            .cloned())
    }

    async fn save_block(
        &self,
        folder: &str,
        kind: BlockKind,
        id: BlockId,
        payload: &[u8],
    ) -> Result<()> {
        self.check_writable()?;
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((folder.to_string(), kind, id), payload.to_vec());
        Ok(())
    }

    async fn delete_block(&self, folder: &str, kind: BlockKind, id: BlockId) -> Result<()> {
        self.check_writable()?;
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(folder.to_string(), kind, id));
        Ok(())
    }
}
