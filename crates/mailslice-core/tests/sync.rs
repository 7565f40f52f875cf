//! Integration tests for folder synchronization.
//!
//! These tests drive a [`FolderSync`] against a scripted remote folder that
//! answers SEARCH and FETCH from an in-memory message list, so every failure
//! mode can be injected without a server.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use mailslice_core::cache::{far_future, far_past};
use mailslice_core::{
    BlockStore, CacheConfig, CacheEvent, CacheSubscription, DateWindow, Error, FolderCache,
    FolderSync, HeaderInfo, MemoryStore, MockClock, SliceStatus, SqliteStore, SyncConfig,
    SyncDirection,
};
use mailslice_imap::{
    BodyStructure, FetchSpec, FetchStream, FetchedMessage, Flag, Flags, ModSeq, RemoteFolder,
    SearchCriteria, Uid, fetch_channel,
};

fn uid(n: u32) -> Uid {
    Uid::new(n).unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
}

fn hours_ago(h: i64) -> DateTime<Utc> {
    now() - TimeDelta::hours(h)
}

#[derive(Debug, Clone)]
struct ServerMessage {
    uid: Uid,
    date: DateTime<Utc>,
    flags: Flags,
    text: String,
}

impl ServerMessage {
    fn new(n: u32, date: DateTime<Utc>) -> Self {
        Self {
            uid: uid(n),
            date,
            flags: Flags::new(),
            text: format!("Body of message {n}"),
        }
    }

    fn seen(mut self) -> Self {
        self.flags.insert(Flag::Seen);
        self
    }
}

/// Remote folder answering from a fixed message list.
#[derive(Default)]
struct ScriptedRemote {
    messages: Mutex<Vec<ServerMessage>>,
    /// Searches that fail with a dropped connection before one succeeds.
    dead_searches: AtomicUsize,
    reconnects: AtomicUsize,
    /// Zero-based index of the body fetch whose stream fails.
    fail_body_fetch: Mutex<Option<usize>>,
    body_fetches: AtomicUsize,
    searches: Mutex<Vec<Vec<SearchCriteria>>>,
}

impl ScriptedRemote {
    fn with(messages: Vec<ServerMessage>) -> Self {
        Self {
            messages: Mutex::new(messages),
            ..Self::default()
        }
    }

    fn find(&self, uid: Uid) -> Option<ServerMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.uid == uid)
            .cloned()
    }
}

fn criteria_match(criteria: &[SearchCriteria], date: DateTime<Utc>) -> bool {
    criteria.iter().all(|c| match c {
        SearchCriteria::Since(day) => date.date_naive() >= *day,
        SearchCriteria::Before(day) => date.date_naive() < *day,
        _ => true,
    })
}

impl RemoteFolder for ScriptedRemote {
    async fn search(&self, criteria: &[SearchCriteria]) -> mailslice_imap::Result<Vec<Uid>> {
        self.searches.lock().unwrap().push(criteria.to_vec());
        if self
            .dead_searches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(mailslice_imap::Error::ConnectionLost("eof".into()));
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| criteria_match(criteria, m.date))
            .map(|m| m.uid)
            .collect())
    }

    async fn fetch(&self, uids: &[Uid], spec: &FetchSpec) -> mailslice_imap::Result<FetchStream> {
        let (tx, rx) = fetch_channel();
        if let FetchSpec::BodyParts(_) = spec {
            let index = self.body_fetches.fetch_add(1, Ordering::SeqCst);
            if *self.fail_body_fetch.lock().unwrap() == Some(index) {
                tx.try_send(Err(mailslice_imap::Error::ConnectionLost(
                    "reset by peer".into(),
                )))
                .unwrap();
                return Ok(rx);
            }
        }

        for &id in uids {
            let Some(m) = self.find(id) else { continue };
            let mut fetched = FetchedMessage::new(m.uid, m.date, m.flags.clone());
            match spec {
                FetchSpec::Headers { .. } => {
                    fetched.header_fields = vec![
                        ("From".into(), "Ada <ada@example.com>".into()),
                        ("To".into(), "bob@example.com".into()),
                        ("Subject".into(), format!("Message {}", m.uid)),
                    ];
                    let size = u32::try_from(m.text.len()).unwrap();
                    fetched.structure = Some(BodyStructure::single("text", "plain", size));
                }
                FetchSpec::BodyParts(sections) => {
                    fetched.parts = sections
                        .iter()
                        .map(|s| (s.clone(), m.text.clone()))
                        .collect();
                }
                FetchSpec::Flags => {}
            }
            tx.try_send(Ok(fetched)).unwrap();
        }
        Ok(rx)
    }

    async fn reconnect(&self) -> mailslice_imap::Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn highest_modseq(&self) -> Option<ModSeq> {
        ModSeq::from_u64(4242)
    }
}

fn cache_with<S: BlockStore>(store: S, config: CacheConfig) -> Arc<FolderCache<S>> {
    let clock = Arc::new(MockClock::at(now()));
    Arc::new(FolderCache::new("INBOX", store, clock, config))
}

fn memory_cache() -> Arc<FolderCache<MemoryStore>> {
    cache_with(MemoryStore::new(), CacheConfig::default())
}

fn everything() -> DateWindow {
    DateWindow::new(far_future(), far_past())
}

fn drain(subscription: &mut CacheSubscription) -> Vec<CacheEvent> {
    let mut events = Vec::new();
    while let Ok(event) = subscription.events.try_recv() {
        events.push(event);
    }
    events
}

fn statuses(events: &[CacheEvent]) -> Vec<SliceStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            CacheEvent::StatusChanged(status) => Some(status.clone()),
            _ => None,
        })
        .collect()
}

async fn cached_ids<S: BlockStore>(cache: &FolderCache<S>) -> Vec<u32> {
    cache
        .get_all_messages_in_date_range(far_future(), far_past())
        .await
        .unwrap()
        .iter()
        .map(|h| h.id.get())
        .collect()
}

#[tokio::test]
async fn test_reconciles_new_known_and_deleted() {
    let cache = memory_cache();
    for (n, h) in [(1, 10), (2, 20), (4, 40)] {
        cache
            .add_message_header(HeaderInfo::new(uid(n), hours_ago(h)))
            .await
            .unwrap();
    }
    let mut sub = cache.subscribe(everything());

    let remote = ScriptedRemote::with(vec![
        ServerMessage::new(1, hours_ago(10)).seen(),
        ServerMessage::new(3, hours_ago(30)),
        ServerMessage::new(5, hours_ago(50)),
    ]);
    let sync = FolderSync::new(remote, Arc::clone(&cache), SyncConfig::default());
    let report = sync
        .sync_date_range(None, None, SyncDirection::NewToOld)
        .await
        .unwrap();

    assert_eq!(report.new, 2);
    assert_eq!(report.updated, 1);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.bodies, 2);
    assert!(report.complete);
    assert_eq!(cached_ids(&cache).await, vec![1, 3, 5]);

    let first = cache.get_message_header(uid(1), hours_ago(10)).await.unwrap().unwrap();
    assert!(first.flags.is_seen());

    let third = cache.get_message_header(uid(3), hours_ago(30)).await.unwrap().unwrap();
    assert_eq!(third.subject, "Message 3");
    assert_eq!(third.author.address, "ada@example.com");
    assert_eq!(third.snippet, "Body of message 3");
    let body = cache.get_message_body(&third).await.unwrap().unwrap();
    assert_eq!(body.body_text.as_deref(), Some("Body of message 3"));
    assert_eq!(body.to.len(), 1);

    let accuracy = cache.accuracy();
    assert_eq!(accuracy.len(), 1);
    let full = accuracy[0].full_sync.clone().unwrap();
    assert_eq!(full.highest_modseq, ModSeq::from_u64(4242));
    assert_eq!(full.updated_at, now());

    let events = drain(&mut sub);
    assert_eq!(
        statuses(&events),
        vec![SliceStatus::Synchronizing, SliceStatus::Synced]
    );
    assert!(events.iter().any(|e| matches!(e, CacheEvent::HeadersRemoved(ids) if ids == &[uid(2)])));
    assert!(events.iter().any(|e| matches!(e, CacheEvent::HeadersUpdated(h) if h[0].id == uid(1))));
}

#[tokio::test]
async fn test_unchanged_flags_are_not_rewritten() {
    let cache = memory_cache();
    cache
        .add_message_header(HeaderInfo::new(uid(7), hours_ago(1)))
        .await
        .unwrap();
    let mut sub = cache.subscribe(everything());

    let remote = ScriptedRemote::with(vec![ServerMessage::new(7, hours_ago(1))]);
    let sync = FolderSync::new(remote, Arc::clone(&cache), SyncConfig::default());
    let report = sync
        .sync_date_range(None, None, SyncDirection::NewToOld)
        .await
        .unwrap();

    assert_eq!(report.updated, 0);
    assert!(
        !drain(&mut sub)
            .iter()
            .any(|e| matches!(e, CacheEvent::HeadersUpdated(_)))
    );
}

#[tokio::test]
async fn test_bounded_range_searches_whole_days() {
    let cache = memory_cache();
    let remote = ScriptedRemote::with(vec![
        ServerMessage::new(1, Utc.with_ymd_and_hms(2024, 3, 9, 23, 0, 0).unwrap()),
        ServerMessage::new(2, Utc.with_ymd_and_hms(2024, 3, 8, 1, 0, 0).unwrap()),
        ServerMessage::new(3, Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap()),
        ServerMessage::new(4, Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap()),
    ]);
    let sync = FolderSync::new(remote, Arc::clone(&cache), SyncConfig::default());

    let younger = Utc.with_ymd_and_hms(2024, 3, 8, 9, 0, 0).unwrap();
    let older = Utc.with_ymd_and_hms(2024, 3, 7, 15, 0, 0).unwrap();
    let report = sync
        .sync_date_range(Some(younger), Some(older), SyncDirection::NewToOld)
        .await
        .unwrap();

    assert_eq!(report.new, 2);
    assert_eq!(cached_ids(&cache).await, vec![2, 3]);

    let accuracy = cache.accuracy();
    assert_eq!(accuracy.len(), 1);
    assert_eq!(
        accuracy[0].oldest,
        Utc.with_ymd_and_hms(2024, 3, 7, 0, 0, 0).unwrap()
    );
    assert!(accuracy[0].youngest < Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap());
    assert!(accuracy[0].youngest > Utc.with_ymd_and_hms(2024, 3, 8, 23, 59, 59).unwrap());

    let searches = sync.remote().searches.lock().unwrap().clone();
    assert!(searches[0].contains(&SearchCriteria::not(SearchCriteria::Draft)));
    assert!(cache.is_range_fresh(younger, older));
}

#[tokio::test]
async fn test_old_to_new_stores_oldest_first() {
    let cache = memory_cache();
    let mut sub = cache.subscribe(everything());
    let remote = ScriptedRemote::with(vec![
        ServerMessage::new(1, hours_ago(1)),
        ServerMessage::new(2, hours_ago(3)),
        ServerMessage::new(3, hours_ago(2)),
    ]);
    let sync = FolderSync::new(remote, Arc::clone(&cache), SyncConfig::default());
    sync.sync_date_range(None, None, SyncDirection::OldToNew)
        .await
        .unwrap();

    let added: Vec<u32> = drain(&mut sub)
        .into_iter()
        .filter_map(|e| match e {
            CacheEvent::HeadersAdded(headers) => Some(headers[0].id.get()),
            _ => None,
        })
        .collect();
    assert_eq!(added, vec![2, 3, 1]);
}

#[tokio::test]
async fn test_network_failure_keeps_earlier_writes() {
    let cache = memory_cache();
    let mut sub = cache.subscribe(everything());
    let remote = ScriptedRemote::with(vec![
        ServerMessage::new(1, hours_ago(1)),
        ServerMessage::new(2, hours_ago(2)),
        ServerMessage::new(3, hours_ago(3)),
        ServerMessage::new(4, hours_ago(4)),
    ]);
    *remote.fail_body_fetch.lock().unwrap() = Some(2);
    let sync = FolderSync::new(remote, Arc::clone(&cache), SyncConfig::default());

    let report = sync
        .sync_date_range(None, None, SyncDirection::NewToOld)
        .await
        .unwrap();

    assert!(!report.complete);
    assert_eq!(cached_ids(&cache).await, vec![1, 2]);
    assert!(cache.accuracy().is_empty());
    let statuses = statuses(&drain(&mut sub));
    assert_eq!(statuses.first(), Some(&SliceStatus::Synchronizing));
    assert!(matches!(statuses.last(), Some(SliceStatus::Failed(_))));
}

#[tokio::test]
async fn test_dead_connection_is_reestablished_once() {
    let cache = memory_cache();
    let remote = ScriptedRemote::with(vec![ServerMessage::new(1, hours_ago(1))]);
    remote.dead_searches.store(1, Ordering::SeqCst);
    let sync = FolderSync::new(remote, Arc::clone(&cache), SyncConfig::default());

    let report = sync
        .sync_date_range(None, None, SyncDirection::NewToOld)
        .await
        .unwrap();

    assert!(report.complete);
    assert_eq!(report.new, 1);
    assert_eq!(sync.remote().reconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreachable_server_fails_the_pass() {
    let cache = memory_cache();
    cache
        .add_message_header(HeaderInfo::new(uid(1), hours_ago(1)))
        .await
        .unwrap();
    let mut sub = cache.subscribe(everything());
    let remote = ScriptedRemote::with(Vec::new());
    remote.dead_searches.store(2, Ordering::SeqCst);
    let sync = FolderSync::new(remote, Arc::clone(&cache), SyncConfig::default());

    let report = sync
        .sync_date_range(None, None, SyncDirection::NewToOld)
        .await
        .unwrap();

    assert!(!report.complete);
    assert_eq!(report.deleted, 0);
    assert_eq!(cached_ids(&cache).await, vec![1]);
    assert!(matches!(
        statuses(&drain(&mut sub)).last(),
        Some(SliceStatus::Failed(_))
    ));
}

#[tokio::test]
async fn test_storage_failure_propagates() {
    let config = CacheConfig {
        max_resident_bytes: 1,
        ..CacheConfig::default()
    };
    let cache = cache_with(MemoryStore::new(), config);
    cache.store().fail_writes(true);
    let remote = ScriptedRemote::with(vec![ServerMessage::new(1, hours_ago(1))]);
    let sync = FolderSync::new(remote, Arc::clone(&cache), SyncConfig::default());

    let err = sync
        .sync_date_range(None, None, SyncDirection::NewToOld)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
}

#[tokio::test]
async fn test_search_date_range_marks_search_provenance() {
    let cache = memory_cache();
    let remote = ScriptedRemote::with(vec![
        ServerMessage::new(1, hours_ago(1)),
        ServerMessage::new(2, hours_ago(100)),
    ]);
    let sync = FolderSync::new(remote, Arc::clone(&cache), SyncConfig::default());

    let ids = sync
        .search_date_range(None, Some(hours_ago(24)), vec![SearchCriteria::Unseen])
        .await
        .unwrap();

    assert_eq!(ids, vec![uid(1)]);
    let accuracy = cache.accuracy();
    assert_eq!(accuracy.len(), 1);
    assert!(accuracy[0].full_sync.is_none());
    assert!(cached_ids(&cache).await.is_empty());
}

#[tokio::test]
async fn test_synced_folder_survives_sqlite_round_trip() {
    let store = SqliteStore::in_memory().await.unwrap();
    let cache = cache_with(store.clone(), CacheConfig::default());
    let remote = ScriptedRemote::with(vec![
        ServerMessage::new(1, hours_ago(1)).seen(),
        ServerMessage::new(2, hours_ago(2)),
    ]);
    let sync = FolderSync::new(remote, Arc::clone(&cache), SyncConfig::default());
    sync.sync_date_range(None, None, SyncDirection::NewToOld)
        .await
        .unwrap();
    cache.flush().await.unwrap();

    let clock = Arc::new(MockClock::at(now()));
    let reopened = FolderCache::open("INBOX", store, clock, CacheConfig::default())
        .await
        .unwrap();
    assert_eq!(cached_ids(&reopened).await, vec![1, 2]);
    assert_eq!(reopened.accuracy(), cache.accuracy());

    let header = reopened
        .get_message_header(uid(1), hours_ago(1))
        .await
        .unwrap()
        .unwrap();
    assert!(header.flags.is_seen());
    let body = reopened.get_message_body(&header).await.unwrap().unwrap();
    assert_eq!(body.body_text.as_deref(), Some("Body of message 1"));
}

#[tokio::test]
async fn test_fresh_cache_opens_without_server() {
    let cache = memory_cache();
    let remote = ScriptedRemote::with((1..=20).map(|n| ServerMessage::new(n, hours_ago(i64::from(n)))).collect());
    let sync = FolderSync::new(remote, Arc::clone(&cache), SyncConfig::default());
    sync.sync_date_range(None, Some(now() - TimeDelta::days(7)), SyncDirection::NewToOld)
        .await
        .unwrap();

    let open = cache.slice_open_from_now(3).await.unwrap();
    assert!(open.is_cached());
    let mailslice_core::SliceOpen::Cached { headers, .. } = open else {
        unreachable!()
    };
    assert_eq!(headers.len(), CacheConfig::default().initial_fill_size);
    assert_eq!(headers[0].id, uid(1));
}

#[tokio::test]
async fn test_concurrent_readers_share_one_block_load() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_with(Arc::clone(&store), CacheConfig::default());
    let remote = ScriptedRemote::with((1..=5).map(|n| ServerMessage::new(n, hours_ago(i64::from(n)))).collect());
    let sync = FolderSync::new(remote, Arc::clone(&cache), SyncConfig::default());
    sync.sync_date_range(None, None, SyncDirection::NewToOld)
        .await
        .unwrap();
    cache.flush().await.unwrap();

    let clock = Arc::new(MockClock::at(now()));
    let reopened = FolderCache::open("INBOX", Arc::clone(&store), clock, CacheConfig::default())
        .await
        .unwrap();
    let before = store.block_loads();
    let (a, b) = tokio::join!(cached_ids(&reopened), cached_ids(&reopened));

    assert_eq!(a, vec![1, 2, 3, 4, 5]);
    assert_eq!(a, b);
    assert_eq!(store.block_loads() - before, 1);
}
