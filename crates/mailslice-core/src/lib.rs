//! # mailslice-core
//!
//! Offline-first synchronization and local caching for a mail folder.
//!
//! This crate provides:
//! - **Aggregator** - joins several named asynchronous results into one
//! - **Folder Cache** - block-structured header/body storage with a
//!   date-sorted block directory, accuracy (sync provenance) tracking,
//!   coalesced lazy block loads and subscriber notifications
//! - **Folder Sync** - reconciles a server SEARCH against the cached headers
//!   and pipelines the resulting fetches back into the cache
//! - **Stores** - in-memory and `SQLite` persistence for blocks and directories
//! - **Configuration** - the tunables, loadable from JSON

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod aggregate;
pub mod cache;
pub mod config;
mod error;
pub mod sync;
pub mod time;

pub use aggregate::{Aggregate, Aggregator, Slot};
pub use cache::{
    AccuracyRange, AttachmentInfo, BlockId, BlockKind, BlockStore, BodyInfo, CacheEvent,
    CacheSubscription, DateWindow, FolderBlockInfo, FolderCache, FullSync, HeaderBatch,
    HeaderInfo, MemoryStore, NameAddress, SliceOpen, SliceStatus, SqliteStore, SubscriptionId,
};
pub use config::{CacheConfig, Config, SyncConfig};
pub use error::{Error, Result};
pub use sync::{
    EnvelopeNormalizer, FolderSync, MessageNormalizer, NormalizedMessage, Reconciliation,
    SyncDirection, SyncReport, reconcile,
};
pub use time::{Clock, MockClock, SystemClock};
