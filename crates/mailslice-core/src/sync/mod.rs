//! Keeping a folder cache in line with its server.

mod engine;
mod normalize;
mod reconcile;

pub use engine::{FolderSync, SyncDirection, SyncReport};
pub use normalize::{
    EnvelopeNormalizer, MessageNormalizer, NormalizedMessage, SNIPPET_LEN, parse_address_list,
    snippet,
};
pub use reconcile::{Reconciliation, reconcile};
