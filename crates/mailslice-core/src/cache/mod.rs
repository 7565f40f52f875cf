//! Block-structured local cache for one folder.
//!
//! Headers and bodies are kept in size-bounded blocks, each covering a
//! contiguous date span. A small directory per kind lists the blocks
//! youngest first; blocks themselves load from the persistent store only
//! when a query or mutation touches them. Accuracy ranges record which date
//! spans were fully synchronized and when, which is what decides whether a
//! view can be shown from cache without asking the server first.

mod block;
mod events;
mod folder;
mod model;
mod range;
mod repository;
mod store;

pub use block::BodyEntry;
pub use events::{CacheEvent, CacheSubscription, SubscriptionId};
pub use folder::{FolderCache, HeaderBatch, SliceOpen};
pub use model::{
    AccuracyRange, AttachmentInfo, BlockId, BlockKind, BodyInfo, DATE_UNIT, DateWindow,
    FolderBlockInfo, FolderInfo, FullSync, HeaderInfo, NameAddress, SliceStatus, far_future,
    far_past,
};
pub use range::{DateSpan, RangeIndex, find_first_overlap_index, find_range_index_for_date};
pub use repository::SqliteStore;
pub use store::{BlockStore, MemoryStore};
