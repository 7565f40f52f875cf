//! The per-folder block cache.
//!
//! A [`FolderCache`] owns everything cached for one folder: the header and
//! body block directories, whichever blocks are resident, the accuracy
//! ranges recording how well each date span is known, and the subscribers
//! watching it. Blocks load lazily from the [`BlockStore`]; concurrent
//! requests for the same block share one load.
//!
//! State lives behind a synchronous mutex that is never held across an
//! await, so every public operation can be called from concurrent tasks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use mailslice_imap::{ModSeq, Uid};
use serde::de::DeserializeOwned;

use super::block::{Block, BlockEntry, BlockSet, BodyEntry, Prepared};
use super::events::{CacheEvent, CacheSubscription, Subscribers, SubscriptionId};
use super::model::{
    AccuracyRange, BlockId, BlockKind, BodyInfo, DATE_UNIT, DateWindow, FolderBlockInfo,
    FolderInfo, FullSync, HeaderInfo, SliceStatus, far_future,
};
use super::range::{find_first_overlap_index, is_well_formed};
use super::store::BlockStore;
use crate::config::CacheConfig;
use crate::time::Clock;
use crate::{Error, Result};

/// One delivery from a range query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBatch {
    /// Headers, youngest first.
    pub headers: Vec<HeaderInfo>,
    /// False on the final delivery.
    pub more_coming: bool,
}

/// Outcome of opening a slice of the folder.
#[derive(Debug)]
pub enum SliceOpen {
    /// Cached data is fresh enough to show as is.
    Cached {
        /// Subscription covering the slice.
        subscription: CacheSubscription,
        /// The initial fill, youngest first.
        headers: Vec<HeaderInfo>,
    },
    /// The slice needs a sync pass first; the subscriber has been told it
    /// is synchronizing.
    NeedsSync {
        /// Subscription covering the slice.
        subscription: CacheSubscription,
    },
}

impl SliceOpen {
    /// The subscription, whichever way the slice opened.
    #[must_use]
    pub const fn subscription(&self) -> &CacheSubscription {
        match self {
            Self::Cached { subscription, .. } | Self::NeedsSync { subscription } => subscription,
        }
    }

    /// Returns true if the slice was answered from cache.
    #[must_use]
    pub const fn is_cached(&self) -> bool {
        matches!(self, Self::Cached { .. })
    }
}

struct CacheState {
    accuracy: Vec<AccuracyRange>,
    headers: BlockSet<HeaderInfo>,
    bodies: BlockSet<BodyEntry>,
    next_block_id: u64,
    info_dirty: bool,
    flushing: usize,
    subscribers: Subscribers,
}

impl CacheState {
    fn from_info(info: FolderInfo) -> Self {
        Self {
            accuracy: info.accuracy,
            headers: BlockSet::new(BlockKind::Header, info.header_blocks),
            bodies: BlockSet::new(BlockKind::Body, info.body_blocks),
            next_block_id: info.next_block_id,
            info_dirty: false,
            flushing: 0,
            subscribers: Subscribers::default(),
        }
    }

    fn folder_info(&self) -> FolderInfo {
        FolderInfo {
            accuracy: self.accuracy.clone(),
            header_blocks: self.headers.directory().to_vec(),
            body_blocks: self.bodies.directory().to_vec(),
            next_block_id: self.next_block_id,
        }
    }

    fn check(&self) -> Result<()> {
        self.headers.check()?;
        self.bodies.check()?;
        if !is_well_formed(&self.accuracy) {
            return Err(Error::Fault(
                "accuracy ranges are unsorted or overlapping".into(),
            ));
        }
        Ok(())
    }
}

type Select<T> = fn(&mut CacheState) -> &mut BlockSet<T>;

fn header_set(state: &mut CacheState) -> &mut BlockSet<HeaderInfo> {
    &mut state.headers
}

fn body_set(state: &mut CacheState) -> &mut BlockSet<BodyEntry> {
    &mut state.bodies
}

/// What a flush took out of the state; put back if writing fails.
struct Unflushed {
    headers: Vec<(BlockId, Block<HeaderInfo>)>,
    bodies: Vec<(BlockId, Block<BodyEntry>)>,
    header_gone: Vec<BlockId>,
    body_gone: Vec<BlockId>,
    info: FolderInfo,
}

enum Step {
    Load(BlockId),
    Emit(Vec<HeaderInfo>, bool),
    Done,
}

/// Block-structured cache for one folder.
pub struct FolderCache<S> {
    folder_id: String,
    store: S,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl<S: BlockStore> FolderCache<S> {
    /// Creates an empty cache without reading the store.
    #[must_use]
    pub fn new(
        folder_id: impl Into<String>,
        store: S,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        Self {
            folder_id: folder_id.into(),
            store,
            clock,
            config,
            state: Mutex::new(CacheState::from_info(FolderInfo::default())),
        }
    }

    /// Opens a folder, restoring its directories from the store. Blocks
    /// load lazily.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory record cannot be read or is corrupt.
    pub async fn open(
        folder_id: impl Into<String>,
        store: S,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Result<Self> {
        let folder_id = folder_id.into();
        let info = match store.load_folder(&folder_id).await? {
            Some(bytes) => serde_json::from_slice::<FolderInfo>(&bytes)?,
            None => FolderInfo::default(),
        };
        tracing::debug!(
            folder = %folder_id,
            header_blocks = info.header_blocks.len(),
            body_blocks = info.body_blocks.len(),
            ranges = info.accuracy.len(),
            "Opened folder cache"
        );

        let state = CacheState::from_info(info);
        state
            .check()
            .map_err(|e| Error::Storage(format!("corrupt directory for {folder_id}: {e}")))?;

        Ok(Self {
            folder_id,
            store,
            clock,
            config,
            state: Mutex::new(state),
        })
    }

    /// Folder this cache belongs to.
    #[must_use]
    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Cache settings.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Clock used for freshness checks.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn verify(&self, state: &CacheState) -> Result<()> {
        state.check().inspect_err(|e| {
            tracing::error!(folder = %self.folder_id, error = %e, "Cache invariant violated");
        })
    }

    /// Snapshot of the header block directory.
    #[must_use]
    pub fn header_directory(&self) -> Vec<FolderBlockInfo> {
        self.lock().headers.directory().to_vec()
    }

    /// Snapshot of the body block directory.
    #[must_use]
    pub fn body_directory(&self) -> Vec<FolderBlockInfo> {
        self.lock().bodies.directory().to_vec()
    }

    /// Snapshot of the accuracy ranges.
    #[must_use]
    pub fn accuracy(&self) -> Vec<AccuracyRange> {
        self.lock().accuracy.clone()
    }

    /// Number of cached headers.
    #[must_use]
    pub fn header_count(&self) -> usize {
        self.lock().headers.total_count()
    }

    /// Estimated bytes of resident blocks.
    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        let state = self.lock();
        state.headers.resident_bytes() + state.bodies.resident_bytes()
    }

    /// Number of resident header and body blocks.
    #[must_use]
    pub fn resident_blocks(&self) -> usize {
        let state = self.lock();
        state.headers.resident_count() + state.bodies.resident_count()
    }

    // Subscriptions

    /// Subscribes to changes within a date window.
    pub fn subscribe(&self, window: DateWindow) -> CacheSubscription {
        self.lock().subscribers.subscribe(window)
    }

    /// Moves a subscription's window. Returns false for an unknown id.
    pub fn set_window(&self, id: SubscriptionId, window: DateWindow) -> bool {
        self.lock().subscribers.set_window(id, window)
    }

    /// Ends a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().subscribers.unsubscribe(id);
    }

    /// Tells every subscriber about a status change.
    pub fn set_status(&self, status: SliceStatus) {
        tracing::debug!(folder = %self.folder_id, %status, "Status changed");
        self.lock()
            .subscribers
            .broadcast(&CacheEvent::StatusChanged(status));
    }

    // Residency

    async fn ensure_resident<T>(&self, kind: BlockKind, id: BlockId, select: Select<T>) -> Result<()>
    where
        T: BlockEntry + DeserializeOwned,
    {
        let cell = {
            let mut state = self.lock();
            let set = select(&mut *state);
            if set.is_resident(id) || !set.lists(id) {
                return Ok(());
            }
            Arc::clone(set.pending.entry(id).or_default())
        };
        cell.get_or_try_init(move || self.load_block(kind, id, select))
            .await?;
        Ok(())
    }

    async fn load_block<T>(&self, kind: BlockKind, id: BlockId, select: Select<T>) -> Result<()>
    where
        T: BlockEntry + DeserializeOwned,
    {
        tracing::debug!(folder = %self.folder_id, %kind, block = %id, "Loading block");
        let bytes = self
            .store
            .load_block(&self.folder_id, kind, id)
            .await?
            .ok_or_else(|| Error::Storage(format!("{kind} block {id} missing from store")))?;
        let block: Block<T> = serde_json::from_slice(&bytes)?;

        let mut state = self.lock();
        let set = select(&mut *state);
        set.install(id, block);
        set.pending.remove(&id);
        Ok(())
    }

    async fn insert_entry<T>(&self, kind: BlockKind, select: Select<T>, item: T) -> Result<()>
    where
        T: BlockEntry + DeserializeOwned,
    {
        loop {
            let needed = {
                let mut guard = self.lock();
                let state = &mut *guard;
                match select(state).prepare_insert(item.date()) {
                    Prepared::NeedsLoad(id) => id,
                    Prepared::Ready => {
                        let mut next = state.next_block_id;
                        select(state).insert(
                            item,
                            self.config.header_est_size,
                            self.config.max_block_size,
                            &mut next,
                        )?;
                        state.next_block_id = next;
                        state.info_dirty = true;
                        return self.verify(state);
                    }
                }
            };
            self.ensure_resident(kind, needed, select).await?;
        }
    }

    async fn remove_entry<T>(
        &self,
        kind: BlockKind,
        select: Select<T>,
        id: Uid,
        date: DateTime<Utc>,
    ) -> Result<Option<T>>
    where
        T: BlockEntry + DeserializeOwned,
    {
        loop {
            let needed = {
                let mut guard = self.lock();
                let state = &mut *guard;
                let set = select(state);
                match set.covering(date) {
                    None => return Ok(None),
                    Some(block) if !set.is_resident(block) => block,
                    Some(_) => {
                        let removed = set.remove(id, date, self.config.header_est_size);
                        if removed.is_some() {
                            state.info_dirty = true;
                            self.verify(state)?;
                        }
                        return Ok(removed);
                    }
                }
            };
            self.ensure_resident(kind, needed, select).await?;
        }
    }

    async fn replace_entry<T>(&self, kind: BlockKind, select: Select<T>, item: T) -> Result<bool>
    where
        T: BlockEntry + DeserializeOwned,
    {
        loop {
            let needed = {
                let mut guard = self.lock();
                let state = &mut *guard;
                let set = select(state);
                match set.covering(item.date()) {
                    None => return Ok(false),
                    Some(block) if !set.is_resident(block) => block,
                    Some(_) => {
                        let replaced = set.replace(item, self.config.header_est_size);
                        if replaced {
                            state.info_dirty = true;
                            self.verify(state)?;
                        }
                        return Ok(replaced);
                    }
                }
            };
            self.ensure_resident(kind, needed, select).await?;
        }
    }

    async fn find_entry<T>(
        &self,
        kind: BlockKind,
        select: Select<T>,
        id: Uid,
        date: DateTime<Utc>,
    ) -> Result<Option<T>>
    where
        T: BlockEntry + DeserializeOwned,
    {
        loop {
            let needed = {
                let mut state = self.lock();
                let set = select(&mut *state);
                match set.covering(date) {
                    None => return Ok(None),
                    Some(block) if !set.is_resident(block) => block,
                    Some(_) => return Ok(set.get(id, date).cloned()),
                }
            };
            self.ensure_resident(kind, needed, select).await?;
        }
    }

    // Mutations

    /// Stores a header and notifies subscribers whose window holds its date.
    ///
    /// A header already stored under the same id and date is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if a block cannot be loaded, or a fault if the
    /// directory invariant breaks.
    pub async fn add_message_header(&self, header: HeaderInfo) -> Result<()> {
        let date = header.date;
        self.insert_entry(BlockKind::Header, header_set, header.clone())
            .await?;
        self.lock()
            .subscribers
            .notify(date, &CacheEvent::HeadersAdded(vec![header]));
        Ok(())
    }

    /// Replaces a stored header (matched by id and date) and notifies
    /// subscribers. Returns false if the header is not stored.
    ///
    /// # Errors
    ///
    /// Returns an error if a block cannot be loaded.
    pub async fn update_message_header(&self, header: HeaderInfo) -> Result<bool> {
        let date = header.date;
        let replaced = self
            .replace_entry(BlockKind::Header, header_set, header.clone())
            .await?;
        if replaced {
            self.lock()
                .subscribers
                .notify(date, &CacheEvent::HeadersUpdated(vec![header]));
        }
        Ok(replaced)
    }

    /// Removes a header and its body, and notifies subscribers. Returns false
    /// if the header is not stored.
    ///
    /// # Errors
    ///
    /// Returns an error if a block cannot be loaded.
    pub async fn delete_message_header(&self, header: &HeaderInfo) -> Result<bool> {
        let removed = self
            .remove_entry(BlockKind::Header, header_set, header.id, header.date)
            .await?
            .is_some();
        self.remove_entry(BlockKind::Body, body_set, header.id, header.date)
            .await?;
        if removed {
            self.lock()
                .subscribers
                .notify(header.date, &CacheEvent::HeadersRemoved(vec![header.id]));
        }
        Ok(removed)
    }

    /// Stores the body belonging to a header.
    ///
    /// # Errors
    ///
    /// Returns an error if a block cannot be loaded.
    pub async fn put_message_body(&self, header: &HeaderInfo, body: BodyInfo) -> Result<()> {
        let entry = BodyEntry {
            id: header.id,
            date: header.date,
            body,
        };
        self.insert_entry(BlockKind::Body, body_set, entry).await
    }

    // Lookups

    /// Reads back the body stored for a header.
    ///
    /// # Errors
    ///
    /// Returns an error if a block cannot be loaded.
    pub async fn get_message_body(&self, header: &HeaderInfo) -> Result<Option<BodyInfo>> {
        Ok(self
            .find_entry(BlockKind::Body, body_set, header.id, header.date)
            .await?
            .map(|entry| entry.body))
    }

    /// Reads one header by id and date.
    ///
    /// # Errors
    ///
    /// Returns an error if a block cannot be loaded.
    pub async fn get_message_header(
        &self,
        id: Uid,
        date: DateTime<Utc>,
    ) -> Result<Option<HeaderInfo>> {
        self.find_entry(BlockKind::Header, header_set, id, date).await
    }

    /// Streams headers dated within `[older, younger]`, youngest first, in
    /// one batch per block, stopping after `limit` headers.
    ///
    /// The final batch has `more_coming == false`; a query that matches
    /// nothing produces exactly one empty final batch.
    ///
    /// # Errors
    ///
    /// Returns an error if a block cannot be loaded.
    pub async fn get_messages_in_date_range<F>(
        &self,
        younger: DateTime<Utc>,
        older: DateTime<Utc>,
        limit: usize,
        mut on_batch: F,
    ) -> Result<()>
    where
        F: FnMut(HeaderBatch),
    {
        let mut cursor = younger;
        let mut remaining = limit;

        loop {
            let step = {
                let state = self.lock();
                let dir = state.headers.directory();
                match find_first_overlap_index(dir, cursor, older) {
                    None => Step::Done,
                    Some(_) if remaining == 0 => Step::Done,
                    Some(i) => match state.headers.block(dir[i].block_id) {
                        None => Step::Load(dir[i].block_id),
                        Some(block) => {
                            let headers: Vec<HeaderInfo> = block
                                .slice(cursor, older)
                                .iter()
                                .take(remaining)
                                .cloned()
                                .collect();
                            remaining -= headers.len();
                            let next = dir[i].oldest.checked_sub_signed(DATE_UNIT);
                            let more = remaining > 0
                                && next.is_some_and(|n| {
                                    n >= older && find_first_overlap_index(dir, n, older).is_some()
                                });
                            if let Some(n) = next {
                                cursor = n;
                            }
                            Step::Emit(headers, more)
                        }
                    },
                }
            };

            match step {
                Step::Load(id) => {
                    self.ensure_resident(BlockKind::Header, id, header_set)
                        .await?;
                }
                Step::Emit(headers, true) => {
                    if !headers.is_empty() {
                        on_batch(HeaderBatch {
                            headers,
                            more_coming: true,
                        });
                    }
                }
                Step::Emit(headers, false) => {
                    on_batch(HeaderBatch {
                        headers,
                        more_coming: false,
                    });
                    return Ok(());
                }
                Step::Done => {
                    on_batch(HeaderBatch {
                        headers: Vec::new(),
                        more_coming: false,
                    });
                    return Ok(());
                }
            }
        }
    }

    /// Collects every header dated within `[older, younger]`, youngest first.
    ///
    /// # Errors
    ///
    /// Returns an error if a block cannot be loaded.
    pub async fn get_all_messages_in_date_range(
        &self,
        younger: DateTime<Utc>,
        older: DateTime<Utc>,
    ) -> Result<Vec<HeaderInfo>> {
        let mut all = Vec::new();
        self.get_messages_in_date_range(younger, older, usize::MAX, |batch| {
            all.extend(batch.headers);
        })
        .await?;
        Ok(all)
    }

    // Accuracy

    /// Records that `[older, younger]` was fully synchronized at
    /// `updated_at`.
    ///
    /// Existing ranges poking out of either end keep the part outside; what
    /// lies inside is replaced. Marking the same range twice changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fault`] if `younger` is older than `older`.
    pub fn mark_sync_range(
        &self,
        younger: DateTime<Utc>,
        older: DateTime<Utc>,
        highest_modseq: Option<ModSeq>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        if younger < older {
            return Err(Error::Fault(format!(
                "sync range ends ({younger}) before it starts ({older})"
            )));
        }

        let mut state = self.lock();
        let mut ranges = Vec::with_capacity(state.accuracy.len() + 2);
        for range in state.accuracy.drain(..) {
            if range.oldest > younger || range.youngest < older {
                ranges.push(range);
                continue;
            }
            if range.youngest > younger {
                ranges.push(AccuracyRange {
                    youngest: range.youngest,
                    oldest: younger + DATE_UNIT,
                    full_sync: range.full_sync.clone(),
                });
            }
            if range.oldest < older {
                ranges.push(AccuracyRange {
                    youngest: older - DATE_UNIT,
                    oldest: range.oldest,
                    full_sync: range.full_sync,
                });
            }
        }
        ranges.push(AccuracyRange {
            youngest: younger,
            oldest: older,
            full_sync: Some(FullSync {
                highest_modseq,
                updated_at,
            }),
        });
        ranges.sort_by(|a, b| b.youngest.cmp(&a.youngest));
        state.accuracy = ranges;
        state.info_dirty = true;

        tracing::debug!(
            folder = %self.folder_id,
            %younger,
            %older,
            ranges = state.accuracy.len(),
            "Marked sync range"
        );
        self.verify(&state)
    }

    /// Records that `[older, younger]` is known from a search only. Spans
    /// already covered keep their provenance; only the gaps are filled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fault`] if `younger` is older than `older`.
    pub fn mark_search_range(&self, younger: DateTime<Utc>, older: DateTime<Utc>) -> Result<()> {
        if younger < older {
            return Err(Error::Fault(format!(
                "search range ends ({younger}) before it starts ({older})"
            )));
        }

        let mut state = self.lock();
        let mut gaps = Vec::new();
        let mut top = Some(younger);
        for range in &state.accuracy {
            let Some(t) = top.filter(|t| *t >= older) else {
                break;
            };
            if range.oldest > t {
                continue;
            }
            if range.youngest < t {
                gaps.push(AccuracyRange {
                    youngest: t,
                    oldest: (range.youngest + DATE_UNIT).max(older),
                    full_sync: None,
                });
            }
            top = range.oldest.checked_sub_signed(DATE_UNIT);
        }
        if let Some(t) = top.filter(|t| *t >= older) {
            gaps.push(AccuracyRange {
                youngest: t,
                oldest: older,
                full_sync: None,
            });
        }
        if gaps.is_empty() {
            return Ok(());
        }

        state.accuracy.extend(gaps);
        state.accuracy.sort_by(|a, b| b.youngest.cmp(&a.youngest));
        state.info_dirty = true;
        self.verify(&state)
    }

    /// Returns true if `[older, younger]` is covered without gaps by full
    /// syncs that all completed within the freshness threshold.
    #[must_use]
    pub fn is_range_fresh(&self, younger: DateTime<Utc>, older: DateTime<Utc>) -> bool {
        let threshold = self.clock.now() - self.config.recent_enough();
        let state = self.lock();
        let Some(start) = find_first_overlap_index(&state.accuracy, younger, older) else {
            return false;
        };

        let mut top = younger;
        for range in &state.accuracy[start..] {
            if range.youngest < top {
                return false;
            }
            match &range.full_sync {
                Some(sync) if sync.updated_at >= threshold => {}
                _ => return false,
            }
            if range.oldest <= older {
                return true;
            }
            top = range.oldest - DATE_UNIT;
        }
        false
    }

    /// Opens a view of the last `days` days.
    ///
    /// The view is subscribed either way. If the span is fresh, the first
    /// `initial_fill_size` headers come straight from the cache; otherwise
    /// the subscriber is told the folder is synchronizing and the caller
    /// should run a sync pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a negative day count, or an error if a
    /// block cannot be loaded. Counts reaching past the earliest
    /// representable date open the whole folder.
    pub async fn slice_open_from_now(&self, days: i64) -> Result<SliceOpen> {
        if days < 0 {
            return Err(Error::Config(format!("cannot open a slice of {days} days")));
        }
        let now = self.clock.now();
        let past = self.clock.days_ago(days);
        let subscription = self.subscribe(DateWindow::since(past));

        if !self.is_range_fresh(now, past) {
            tracing::debug!(folder = %self.folder_id, days, "Slice needs sync");
            self.lock().subscribers.send_to(
                subscription.id,
                &CacheEvent::StatusChanged(SliceStatus::Synchronizing),
            );
            return Ok(SliceOpen::NeedsSync { subscription });
        }

        let mut headers = Vec::new();
        self.get_messages_in_date_range(
            far_future(),
            past,
            self.config.initial_fill_size,
            |batch| headers.extend(batch.headers),
        )
        .await?;
        tracing::debug!(folder = %self.folder_id, days, count = headers.len(), "Slice opened from cache");
        Ok(SliceOpen::Cached {
            subscription,
            headers,
        })
    }

    // Persistence

    /// Writes every dirty block, pending deletion and the directory record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects a write; nothing is lost and a
    /// later flush retries.
    pub async fn flush(&self) -> Result<()> {
        let unflushed = {
            let mut state = self.lock();
            if !state.info_dirty && !state.headers.has_unflushed() && !state.bodies.has_unflushed()
            {
                return Ok(());
            }
            state.info_dirty = false;
            state.flushing += 1;
            Unflushed {
                headers: state.headers.take_dirty(),
                bodies: state.bodies.take_dirty(),
                header_gone: state.headers.take_discarded(),
                body_gone: state.bodies.take_discarded(),
                info: state.folder_info(),
            }
        };

        let result = self.write(&unflushed).await;

        let mut state = self.lock();
        state.flushing -= 1;
        match result {
            Ok(()) => {
                tracing::info!(
                    folder = %self.folder_id,
                    headers = unflushed.headers.len(),
                    bodies = unflushed.bodies.len(),
                    deleted = unflushed.header_gone.len() + unflushed.body_gone.len(),
                    "Flushed folder cache"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(folder = %self.folder_id, error = %e, "Flush failed");
                state.headers.restore_unflushed(
                    unflushed.headers.iter().map(|(id, _)| *id),
                    unflushed.header_gone,
                );
                state.bodies.restore_unflushed(
                    unflushed.bodies.iter().map(|(id, _)| *id),
                    unflushed.body_gone,
                );
                state.info_dirty = true;
                Err(e)
            }
        }
    }

    async fn write(&self, unflushed: &Unflushed) -> Result<()> {
        let folder = self.folder_id.as_str();
        for (id, block) in &unflushed.headers {
            let payload = serde_json::to_vec(block)?;
            self.store
                .save_block(folder, BlockKind::Header, *id, &payload)
                .await?;
        }
        for (id, block) in &unflushed.bodies {
            let payload = serde_json::to_vec(block)?;
            self.store
                .save_block(folder, BlockKind::Body, *id, &payload)
                .await?;
        }
        for id in &unflushed.header_gone {
            self.store.delete_block(folder, BlockKind::Header, *id).await?;
        }
        for id in &unflushed.body_gone {
            self.store.delete_block(folder, BlockKind::Body, *id).await?;
        }
        let info = serde_json::to_vec(&unflushed.info)?;
        self.store.save_folder(folder, &info).await
    }

    /// Evicts resident blocks no subscriber is looking at, oldest first,
    /// once resident bytes exceed `max_resident_bytes`. Dirty blocks are
    /// flushed beforehand. Returns how many blocks were evicted.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub async fn relieve_memory_pressure(&self) -> Result<usize> {
        let max = self.config.max_resident_bytes;
        if self.resident_bytes() <= max {
            return Ok(0);
        }
        self.flush().await?;

        let mut guard = self.lock();
        let state = &mut *guard;
        if state.flushing > 0 {
            return Ok(0);
        }
        let windows = state.subscribers.windows();
        let keep = |info: &FolderBlockInfo| {
            windows
                .iter()
                .any(|w| w.overlaps(info.youngest, info.oldest))
        };

        let header_bytes = state.headers.resident_bytes();
        let mut evicted = state.bodies.evict(max.saturating_sub(header_bytes), keep);
        let body_bytes = state.bodies.resident_bytes();
        evicted += state.headers.evict(max.saturating_sub(body_bytes), keep);

        tracing::info!(
            folder = %self.folder_id,
            evicted,
            resident = state.headers.resident_bytes() + body_bytes,
            "Relieved memory pressure"
        );
        Ok(evicted)
    }
}
