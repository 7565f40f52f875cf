//! Size-bounded, date-contiguous blocks and the directory that indexes them.
//!
//! A [`BlockSet`] owns one directory (headers or bodies) together with the
//! blocks of it that are currently resident. All of its operations are
//! synchronous and assume the blocks they touch are resident; the folder
//! cache makes them resident first.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mailslice_imap::Uid;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use super::model::{BlockId, BlockKind, BodyInfo, DATE_UNIT, FolderBlockInfo, HeaderInfo};
use super::range::{RangeIndex, find_range_index_for_date, is_well_formed};
use crate::{Error, Result};

/// An entry stored in a block.
pub trait BlockEntry: Clone {
    /// Message the entry belongs to.
    fn id(&self) -> Uid;
    /// Date the entry sorts by.
    fn date(&self) -> DateTime<Utc>;
    /// Estimated bytes, given the configured per-header estimate.
    fn est_size(&self, header_est_size: usize) -> usize;
}

impl BlockEntry for HeaderInfo {
    fn id(&self) -> Uid {
        self.id
    }

    fn date(&self) -> DateTime<Utc> {
        self.date
    }

    fn est_size(&self, header_est_size: usize) -> usize {
        header_est_size
    }
}

/// A body stored alongside the date of the header that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyEntry {
    /// Owning header id.
    pub id: Uid,
    /// Owning header date.
    pub date: DateTime<Utc>,
    /// The body.
    pub body: BodyInfo,
}

impl BlockEntry for BodyEntry {
    fn id(&self) -> Uid {
        self.id
    }

    fn date(&self) -> DateTime<Utc> {
        self.date
    }

    fn est_size(&self, _: usize) -> usize {
        self.body.estimated_size()
    }
}

/// A block payload: entries sorted descending by date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Block<T> {
    /// Entries, youngest first.
    pub items: Vec<T>,
}

impl<T> Default for Block<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: BlockEntry> Block<T> {
    fn insertion_point(&self, date: DateTime<Utc>) -> usize {
        self.items.partition_point(|item| item.date() >= date)
    }

    fn position(&self, id: Uid, date: DateTime<Utc>) -> Option<usize> {
        let start = self.items.partition_point(|item| item.date() > date);
        self.items[start..]
            .iter()
            .take_while(|item| item.date() == date)
            .position(|item| item.id() == id)
            .map(|offset| start + offset)
    }

    /// Entries whose date is within `[older, younger]`, youngest first.
    pub fn slice(&self, younger: DateTime<Utc>, older: DateTime<Utc>) -> &[T] {
        let start = self.items.partition_point(|item| item.date() > younger);
        let end = self.items.partition_point(|item| item.date() >= older);
        &self.items[start..end.max(start)]
    }

    /// Index at which to cut so both halves hold about the same number of
    /// entries and no date straddles the cut.
    fn split_point(&self) -> Option<usize> {
        let len = self.items.len();
        let mid = len / 2;
        let differs = |k: usize| self.items[k - 1].date() != self.items[k].date();
        (0..len).find_map(|step| {
            [mid.checked_sub(step), mid.checked_add(step)]
                .into_iter()
                .flatten()
                .find(|&k| k >= 1 && k < len && differs(k))
        })
    }
}

/// What an insert needs before it can proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prepared {
    /// Every block involved is resident.
    Ready,
    /// This block must be loaded first.
    NeedsLoad(BlockId),
}

/// One directory plus its resident blocks.
#[derive(Debug)]
pub struct BlockSet<T> {
    kind: BlockKind,
    dir: Vec<FolderBlockInfo>,
    resident: HashMap<BlockId, Block<T>>,
    dirty: HashSet<BlockId>,
    discarded: Vec<BlockId>,
    pub(crate) pending: HashMap<BlockId, Arc<OnceCell<()>>>,
}

impl<T: BlockEntry> BlockSet<T> {
    /// Creates a set from a persisted directory; no block is resident.
    #[must_use]
    pub fn new(kind: BlockKind, dir: Vec<FolderBlockInfo>) -> Self {
        Self {
            kind,
            dir,
            resident: HashMap::new(),
            dirty: HashSet::new(),
            discarded: Vec::new(),
            pending: HashMap::new(),
        }
    }

    /// The directory, youngest first.
    #[must_use]
    pub fn directory(&self) -> &[FolderBlockInfo] {
        &self.dir
    }

    /// Whether the block is in memory.
    #[must_use]
    pub fn is_resident(&self, id: BlockId) -> bool {
        self.resident.contains_key(&id)
    }

    /// Whether the directory still lists the block.
    #[must_use]
    pub fn lists(&self, id: BlockId) -> bool {
        self.dir.iter().any(|info| info.block_id == id)
    }

    /// Resident block by id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block<T>> {
        self.resident.get(&id)
    }

    /// Makes a loaded block resident. A block that is already resident is
    /// kept, since it may carry unsaved changes.
    pub fn install(&mut self, id: BlockId, block: Block<T>) {
        if self.lists(id) {
            self.resident.entry(id).or_insert(block);
        }
    }

    /// Estimated bytes held by resident blocks.
    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.dir
            .iter()
            .filter(|info| self.resident.contains_key(&info.block_id))
            .map(|info| info.est_size)
            .sum()
    }

    /// Number of resident blocks.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    /// Total entries across the directory.
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.dir.iter().map(|info| info.count).sum()
    }

    fn index_of(&self, id: BlockId) -> Option<usize> {
        self.dir.iter().position(|info| info.block_id == id)
    }

    /// The block an entry dated `date` belongs in. A date between blocks
    /// falls into the older neighbour, or the last block past the end.
    fn target_index(&self, date: DateTime<Utc>) -> Option<usize> {
        if self.dir.is_empty() {
            return None;
        }
        Some(match find_range_index_for_date(&self.dir, date) {
            RangeIndex::Within(i) => i,
            RangeIndex::InsertAt(i) => i.min(self.dir.len() - 1),
        })
    }

    /// The block that covers `date`, if any.
    #[must_use]
    pub fn covering(&self, date: DateTime<Utc>) -> Option<BlockId> {
        match find_range_index_for_date(&self.dir, date) {
            RangeIndex::Within(i) => Some(self.dir[i].block_id),
            RangeIndex::InsertAt(_) => None,
        }
    }

    /// Checks whether an insert at `date` can run now.
    #[must_use]
    pub fn prepare_insert(&self, date: DateTime<Utc>) -> Prepared {
        match self.target_index(date) {
            Some(i) if !self.is_resident(self.dir[i].block_id) => {
                Prepared::NeedsLoad(self.dir[i].block_id)
            }
            _ => Prepared::Ready,
        }
    }

    /// Inserts an entry, replacing one with the same id and date, and splits
    /// the block if it grew past `max_block_size`.
    ///
    /// The target block must be resident (see [`Self::prepare_insert`]).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fault`] if the target block is not resident.
    pub fn insert(
        &mut self,
        item: T,
        header_est_size: usize,
        max_block_size: usize,
        next_id: &mut u64,
    ) -> Result<()> {
        let date = item.date();
        let size = item.est_size(header_est_size);

        let Some(idx) = self.target_index(date) else {
            let id = allocate(next_id);
            self.dir.push(FolderBlockInfo {
                block_id: id,
                youngest: date,
                oldest: date,
                count: 1,
                est_size: size,
            });
            self.resident.insert(id, Block { items: vec![item] });
            self.dirty.insert(id);
            tracing::debug!(kind = %self.kind, block = %id, "Created first block");
            return Ok(());
        };

        let id = self.dir[idx].block_id;
        let block = self
            .resident
            .get_mut(&id)
            .ok_or_else(|| Error::Fault(format!("{} block {id} is not resident", self.kind)))?;
        let info = &mut self.dir[idx];

        if let Some(pos) = block.position(item.id(), date) {
            let old = std::mem::replace(&mut block.items[pos], item);
            info.est_size = info.est_size - old.est_size(header_est_size) + size;
        } else {
            let pos = block.insertion_point(date);
            block.items.insert(pos, item);
            info.count += 1;
            info.est_size += size;
            info.youngest = info.youngest.max(date);
            info.oldest = info.oldest.min(date);
        }
        self.dirty.insert(id);

        if info.est_size > max_block_size && info.count >= 2 {
            self.split(idx, header_est_size, next_id);
        }
        Ok(())
    }

    fn split(&mut self, idx: usize, header_est_size: usize, next_id: &mut u64) {
        let id = self.dir[idx].block_id;
        let Some(block) = self.resident.get_mut(&id) else {
            return;
        };
        let Some(cut) = block.split_point() else {
            tracing::debug!(kind = %self.kind, block = %id, "Block cannot split, all entries share a date");
            return;
        };

        let older_items = block.items.split_off(cut);
        let younger_oldest = block.items[block.items.len() - 1].date();
        let younger_size: usize = block.items.iter().map(|i| i.est_size(header_est_size)).sum();
        let older_size: usize = older_items.iter().map(|i| i.est_size(header_est_size)).sum();

        let new_id = allocate(next_id);
        let info = &mut self.dir[idx];
        let older_info = FolderBlockInfo {
            block_id: new_id,
            youngest: younger_oldest - DATE_UNIT,
            oldest: info.oldest,
            count: older_items.len(),
            est_size: older_size,
        };
        info.oldest = younger_oldest;
        info.count = block.items.len();
        info.est_size = younger_size;

        tracing::debug!(
            kind = %self.kind,
            block = %id,
            new_block = %new_id,
            younger = info.count,
            older = older_info.count,
            "Split block"
        );

        self.dir.insert(idx + 1, older_info);
        self.resident.insert(new_id, Block { items: older_items });
        self.dirty.insert(new_id);
    }

    /// Finds an entry by id and date in a resident block.
    #[must_use]
    pub fn get(&self, id: Uid, date: DateTime<Utc>) -> Option<&T> {
        let block = self.resident.get(&self.covering(date)?)?;
        block.position(id, date).map(|pos| &block.items[pos])
    }

    /// Replaces an entry in place. Returns false if it is not stored.
    pub fn replace(&mut self, item: T, header_est_size: usize) -> bool {
        let date = item.date();
        let Some(idx) = self.dir.iter().position(|i| date <= i.youngest && date >= i.oldest) else {
            return false;
        };
        let id = self.dir[idx].block_id;
        let Some(block) = self.resident.get_mut(&id) else {
            return false;
        };
        let Some(pos) = block.position(item.id(), date) else {
            return false;
        };
        let new_size = item.est_size(header_est_size);
        let old = std::mem::replace(&mut block.items[pos], item);
        let info = &mut self.dir[idx];
        info.est_size = info.est_size - old.est_size(header_est_size) + new_size;
        self.dirty.insert(id);
        true
    }

    /// Removes an entry. Bounds are kept; a block left empty leaves the
    /// directory and is deleted from the store on the next flush.
    pub fn remove(&mut self, id: Uid, date: DateTime<Utc>, header_est_size: usize) -> Option<T> {
        let block_id = self.covering(date)?;
        let idx = self.index_of(block_id)?;
        let block = self.resident.get_mut(&block_id)?;
        let pos = block.position(id, date)?;
        let removed = block.items.remove(pos);

        let info = &mut self.dir[idx];
        info.count -= 1;
        info.est_size = info.est_size.saturating_sub(removed.est_size(header_est_size));

        if info.count == 0 {
            self.dir.remove(idx);
            self.resident.remove(&block_id);
            self.dirty.remove(&block_id);
            self.discarded.push(block_id);
            tracing::debug!(kind = %self.kind, block = %block_id, "Discarded empty block");
        } else {
            self.dirty.insert(block_id);
        }
        Some(removed)
    }

    /// Verifies the directory and resident blocks agree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fault`] describing the first violation.
    pub fn check(&self) -> Result<()> {
        if !is_well_formed(&self.dir) {
            return Err(Error::Fault(format!(
                "{} directory is unsorted or overlapping",
                self.kind
            )));
        }
        for info in &self.dir {
            let Some(block) = self.resident.get(&info.block_id) else {
                continue;
            };
            if block.items.len() != info.count {
                return Err(Error::Fault(format!(
                    "{} block {} holds {} entries, directory says {}",
                    self.kind,
                    info.block_id,
                    block.items.len(),
                    info.count
                )));
            }
            if block
                .items
                .iter()
                .any(|item| item.date() > info.youngest || item.date() < info.oldest)
            {
                return Err(Error::Fault(format!(
                    "{} block {} holds an entry outside its bounds",
                    self.kind, info.block_id
                )));
            }
        }
        Ok(())
    }

    /// Removes and returns the dirty ids with a copy of their blocks.
    pub fn take_dirty(&mut self) -> Vec<(BlockId, Block<T>)> {
        let ids: Vec<BlockId> = self.dirty.drain().collect();
        ids.into_iter()
            .filter_map(|id| self.resident.get(&id).map(|b| (id, b.clone())))
            .collect()
    }

    /// Removes and returns the ids of blocks awaiting deletion.
    pub fn take_discarded(&mut self) -> Vec<BlockId> {
        std::mem::take(&mut self.discarded)
    }

    /// Puts back what a failed flush took.
    pub fn restore_unflushed(&mut self, dirty: impl IntoIterator<Item = BlockId>, discarded: Vec<BlockId>) {
        for id in dirty {
            if self.resident.contains_key(&id) {
                self.dirty.insert(id);
            }
        }
        self.discarded.extend(discarded);
    }

    /// Whether any block is waiting to be written or deleted.
    #[must_use]
    pub fn has_unflushed(&self) -> bool {
        !self.dirty.is_empty() || !self.discarded.is_empty()
    }

    /// Drops clean resident blocks that `keep` rejects, oldest first, until
    /// resident bytes fall to `target`. Returns how many were dropped.
    pub fn evict(&mut self, target: usize, keep: impl Fn(&FolderBlockInfo) -> bool) -> usize {
        let mut bytes = self.resident_bytes();
        let mut evicted = 0;
        for info in self.dir.iter().rev() {
            if bytes <= target {
                break;
            }
            let id = info.block_id;
            if !self.resident.contains_key(&id) || self.dirty.contains(&id) || keep(info) {
                continue;
            }
            self.resident.remove(&id);
            bytes = bytes.saturating_sub(info.est_size);
            evicted += 1;
            tracing::debug!(kind = %self.kind, block = %id, "Evicted block");
        }
        evicted
    }
}

const fn allocate(next_id: &mut u64) -> BlockId {
    let id = BlockId(*next_id);
    *next_id += 1;
    id
}
