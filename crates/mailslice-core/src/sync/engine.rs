//! The folder synchronizer.
//!
//! One pass over a date range runs in three stages:
//!
//! 1. The server SEARCH and the cache's range query run concurrently and are
//!    joined through an [`Aggregator`].
//! 2. The two id sets are reconciled; headers the server no longer has are
//!    removed from the cache.
//! 3. Two pipelines run side by side: new messages are fetched (headers and
//!    structure, then their text part) and stored; known messages get a
//!    flags refresh.
//!
//! The flags refresh only writes headers whose flags actually changed, so a
//! known message with unchanged flags produces no update event.
//!
//! A network or protocol failure aborts only the pipeline it hit. Whatever
//! was stored before stays, subscribers see a failed status, and the pass
//! reports itself incomplete. Storage failures and faults propagate.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use mailslice_imap::{FetchSpec, RemoteFolder, SearchCriteria, Uid};
use tokio::sync::Mutex;

use super::normalize::{EnvelopeNormalizer, MessageNormalizer, NormalizedMessage};
use super::reconcile::reconcile;
use crate::aggregate::Aggregator;
use crate::cache::{BlockStore, DATE_UNIT, FolderCache, HeaderInfo, SliceStatus, far_future, far_past};
use crate::config::SyncConfig;
use crate::{Error, Result};

/// Order in which new messages get their bodies fetched.
///
/// Only new messages are affected: their bodies are fetched and each
/// message is stored in this order. The flags refresh of known messages is
/// unordered. [`SyncDirection::NewToOld`] is the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncDirection {
    /// Newest first, for a view anchored at the present.
    #[default]
    NewToOld,
    /// Oldest first, for a view growing into the future.
    OldToNew,
}

/// Summary of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Messages added to the cache.
    pub new: usize,
    /// Headers whose flags changed.
    pub updated: usize,
    /// Headers removed because the server no longer has them.
    pub deleted: usize,
    /// Text bodies fetched.
    pub bodies: usize,
    /// Whether every stage finished; only complete passes mark the range as
    /// synchronized.
    pub complete: bool,
}

/// Results joined at the start of a pass.
enum Gathered {
    ServerIds(Vec<Uid>),
    LocalHeaders(Vec<HeaderInfo>),
}

#[derive(Debug, Default)]
struct NewOutcome {
    added: usize,
    bodies: usize,
}

/// The date span a pass covers, widened to whole days because SEARCH dates
/// have day granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SearchSpan {
    younger: DateTime<Utc>,
    older: DateTime<Utc>,
    since: Option<chrono::NaiveDate>,
    before: Option<chrono::NaiveDate>,
}

impl SearchSpan {
    fn new(younger: Option<DateTime<Utc>>, older: Option<DateTime<Utc>>) -> Self {
        let before = younger.and_then(|d| d.date_naive().succ_opt());
        let since = older.map(|d| d.date_naive());
        Self {
            younger: before.map_or_else(far_future, |day| {
                day.and_time(NaiveTime::MIN).and_utc() - DATE_UNIT
            }),
            older: since.map_or_else(far_past, |day| day.and_time(NaiveTime::MIN).and_utc()),
            since,
            before,
        }
    }
}

/// Synchronizes one folder's cache against its server.
pub struct FolderSync<R, S, N = EnvelopeNormalizer> {
    remote: R,
    cache: Arc<FolderCache<S>>,
    normalizer: N,
    config: SyncConfig,
    pass: Mutex<()>,
}

impl<R, S> FolderSync<R, S, EnvelopeNormalizer> {
    /// Creates a synchronizer with the default normalizer.
    #[must_use]
    pub fn new(remote: R, cache: Arc<FolderCache<S>>, config: SyncConfig) -> Self {
        Self::with_normalizer(remote, cache, EnvelopeNormalizer, config)
    }
}

impl<R, S, N> FolderSync<R, S, N> {
    /// Creates a synchronizer with a custom normalizer.
    #[must_use]
    pub fn with_normalizer(
        remote: R,
        cache: Arc<FolderCache<S>>,
        normalizer: N,
        config: SyncConfig,
    ) -> Self {
        Self {
            remote,
            cache,
            normalizer,
            config,
            pass: Mutex::new(()),
        }
    }

    /// The remote folder.
    pub const fn remote(&self) -> &R {
        &self.remote
    }

    /// The cache being filled.
    pub const fn cache(&self) -> &Arc<FolderCache<S>> {
        &self.cache
    }
}

impl<R, S, N> FolderSync<R, S, N>
where
    R: RemoteFolder,
    S: BlockStore,
    N: MessageNormalizer,
{
    fn criteria(&self, span: &SearchSpan, extra: Vec<SearchCriteria>) -> Vec<SearchCriteria> {
        let mut criteria = Vec::new();
        if self.config.exclude_drafts {
            criteria.push(SearchCriteria::not(SearchCriteria::Draft));
        }
        if let Some(day) = span.since {
            criteria.push(SearchCriteria::Since(day));
        }
        if let Some(day) = span.before {
            criteria.push(SearchCriteria::Before(day));
        }
        criteria.extend(extra);
        criteria
    }

    /// Runs a search, reconnecting once if the connection turns out to be
    /// dead.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails for another reason, or fails
    /// again after reconnecting.
    pub async fn reliable_search(&self, criteria: &[SearchCriteria]) -> Result<Vec<Uid>> {
        match self.remote.search(criteria).await {
            Ok(uids) => Ok(uids),
            Err(e) if e.is_connection_error() => {
                tracing::warn!(folder = %self.cache.folder_id(), error = %e, "Search hit a dead connection, reconnecting");
                self.remote.reconnect().await?;
                Ok(self.remote.search(criteria).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Searches a date range with extra criteria and returns the matching
    /// ids without reconciling them. Spans of the range the cache knew
    /// nothing about are recorded as search-derived.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    pub async fn search_date_range(
        &self,
        younger: Option<DateTime<Utc>>,
        older: Option<DateTime<Utc>>,
        extra: Vec<SearchCriteria>,
    ) -> Result<Vec<Uid>> {
        let span = SearchSpan::new(younger, older);
        let criteria = self.criteria(&span, extra);
        let uids = self.reliable_search(&criteria).await?;
        self.cache.mark_search_range(span.younger, span.older)?;
        Ok(uids)
    }

    /// Brings the cache in line with the server for a date range.
    ///
    /// `None` bounds leave that side open. Passes on one synchronizer run
    /// one at a time.
    ///
    /// # Errors
    ///
    /// Returns an error for storage failures and faults. Network and
    /// protocol failures are reported through subscribers and an incomplete
    /// [`SyncReport`] instead.
    pub async fn sync_date_range(
        &self,
        younger: Option<DateTime<Utc>>,
        older: Option<DateTime<Utc>>,
        direction: SyncDirection,
    ) -> Result<SyncReport> {
        let _pass = self.pass.lock().await;
        let folder = self.cache.folder_id().to_string();
        let span = SearchSpan::new(younger, older);
        let criteria = self.criteria(&span, Vec::new());
        tracing::debug!(folder = %folder, criteria = ?criteria, "Starting sync pass");
        self.cache.set_status(SliceStatus::Synchronizing);

        let (server_ids, local) = match self.gather(&criteria, &span).await {
            Ok(gathered) => gathered,
            Err(e) => return self.abandon(e),
        };

        let plan = reconcile(&server_ids, local);
        tracing::debug!(
            folder = %folder,
            server = server_ids.len(),
            new = plan.new_ids.len(),
            known = plan.known.len(),
            deleted = plan.deleted.len(),
            "Reconciled"
        );

        let mut report = SyncReport::default();
        for header in &plan.deleted {
            if self.cache.delete_message_header(header).await.or_else(|e| self.fatal(e))? {
                report.deleted += 1;
            }
        }

        let (new, known) = tokio::join!(
            self.sync_new(&plan.new_ids, direction),
            self.sync_known(plan.known),
        );

        let mut failure = None;
        match new {
            Ok(outcome) => {
                report.new = outcome.added;
                report.bodies = outcome.bodies;
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(folder = %folder, error = %e, "New-message pipeline aborted");
                failure = Some(e.to_string());
            }
            Err(e) => return self.fatal(e),
        }
        match known {
            Ok(updated) => report.updated = updated,
            Err(e) if e.is_recoverable() => {
                tracing::warn!(folder = %folder, error = %e, "Flag refresh pipeline aborted");
                failure.get_or_insert_with(|| e.to_string());
            }
            Err(e) => return self.fatal(e),
        }

        report.complete = failure.is_none();
        if report.complete {
            self.cache
                .mark_sync_range(
                    span.younger,
                    span.older,
                    self.remote.highest_modseq(),
                    self.cache.clock().now(),
                )
                .or_else(|e| self.fatal(e))?;
        }
        self.cache.set_status(match failure {
            None => SliceStatus::Synced,
            Some(reason) => SliceStatus::Failed(reason),
        });
        self.cache.relieve_memory_pressure().await?;

        tracing::info!(
            folder = %folder,
            new = report.new,
            updated = report.updated,
            deleted = report.deleted,
            bodies = report.bodies,
            complete = report.complete,
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Runs the server search and the local range query concurrently.
    async fn gather(
        &self,
        criteria: &[SearchCriteria],
        span: &SearchSpan,
    ) -> Result<(Vec<Uid>, Vec<HeaderInfo>)> {
        let (aggregator, joined) = Aggregator::<Result<Gathered>>::join(["search", "db"])?;
        let search = aggregator.slot("search")?;
        let db = aggregator.slot("db")?;

        let (searched, queried) = tokio::join!(
            async {
                let uids = self.reliable_search(criteria).await;
                search.fire(uids.map(Gathered::ServerIds))
            },
            async {
                let headers = self
                    .cache
                    .get_all_messages_in_date_range(span.younger, span.older)
                    .await;
                db.fire(headers.map(Gathered::LocalHeaders))
            },
        );
        searched?;
        queried?;

        let mut results = joined
            .await
            .map_err(|_| Error::Fault("sync join completed without results".into()))?;
        let server = match results.take("search") {
            Some(Ok(Gathered::ServerIds(uids))) => uids,
            Some(Err(e)) => return Err(e),
            _ => return Err(Error::Fault("search slot carried the wrong result".into())),
        };
        let local = match results.take("db") {
            Some(Ok(Gathered::LocalHeaders(headers))) => headers,
            Some(Err(e)) => return Err(e),
            _ => return Err(Error::Fault("db slot carried the wrong result".into())),
        };
        Ok((server, local))
    }

    async fn sync_new(&self, uids: &[Uid], direction: SyncDirection) -> Result<NewOutcome> {
        let mut outcome = NewOutcome::default();
        if uids.is_empty() {
            return Ok(outcome);
        }

        let spec = FetchSpec::headers_with_structure(self.config.header_fields.iter().cloned());
        let mut stream = self.remote.fetch(uids, &spec).await?;
        let mut buffered: Vec<NormalizedMessage> = Vec::with_capacity(uids.len());
        while let Some(message) = stream.recv().await {
            buffered.push(self.normalizer.normalize(&message?)?);
        }

        match direction {
            SyncDirection::NewToOld => buffered.sort_by(|a, b| b.header.date.cmp(&a.header.date)),
            SyncDirection::OldToNew => buffered.sort_by(|a, b| a.header.date.cmp(&b.header.date)),
        }

        // Every body fetch goes out before the first is read, so they
        // pipeline on the wire.
        let mut pending = Vec::with_capacity(buffered.len());
        for message in buffered {
            let stream = match &message.text_part {
                Some(section) => Some(
                    self.remote
                        .fetch(&[message.header.id], &FetchSpec::body_part(section.clone()))
                        .await?,
                ),
                None => None,
            };
            pending.push((message, stream));
        }

        for (mut message, stream) in pending {
            if let (Some(mut stream), Some(section)) = (stream, message.text_part.clone()) {
                while let Some(part) = stream.recv().await {
                    let part = part?;
                    if let Some(text) = part.part(&section) {
                        self.normalizer.apply_text(&mut message, text);
                        outcome.bodies += 1;
                    }
                }
            }
            self.cache.add_message_header(message.header.clone()).await?;
            self.cache.put_message_body(&message.header, message.body).await?;
            outcome.added += 1;
        }
        Ok(outcome)
    }

    async fn sync_known(&self, known: Vec<HeaderInfo>) -> Result<usize> {
        if known.is_empty() {
            return Ok(0);
        }

        let uids: Vec<Uid> = known.iter().map(|h| h.id).collect();
        let mut by_id: HashMap<Uid, HeaderInfo> = known.into_iter().map(|h| (h.id, h)).collect();
        let mut stream = self.remote.fetch(&uids, &FetchSpec::Flags).await?;

        let mut updated = 0;
        while let Some(message) = stream.recv().await {
            let message = message?;
            let Some(mut header) = by_id.remove(&message.uid) else {
                tracing::debug!(uid = %message.uid, "Ignoring unrequested FETCH result");
                continue;
            };
            if header.flags == message.flags {
                continue;
            }
            header.flags = message.flags;
            if self.cache.update_message_header(header).await? {
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Ends a pass that failed before any pipeline ran.
    fn abandon(&self, err: Error) -> Result<SyncReport> {
        if !err.is_recoverable() {
            return self.fatal(err);
        }
        tracing::warn!(folder = %self.cache.folder_id(), error = %err, "Sync pass aborted");
        self.cache.set_status(SliceStatus::Failed(err.to_string()));
        Ok(SyncReport::default())
    }

    fn fatal<T>(&self, err: Error) -> Result<T> {
        if err.is_fault() {
            tracing::error!(folder = %self.cache.folder_id(), error = %err, "Sync pass hit a fault");
        }
        self.cache.set_status(SliceStatus::Failed(err.to_string()));
        Err(err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn span_widens_to_whole_days() {
        let younger = DateTime::parse_from_rfc3339("2024-03-07T15:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let older = DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let span = SearchSpan::new(Some(younger), Some(older));

        assert_eq!(span.since, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(span.before, NaiveDate::from_ymd_opt(2024, 3, 8));
        assert_eq!(span.older.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert_eq!(
            span.younger + DATE_UNIT,
            DateTime::parse_from_rfc3339("2024-03-08T00:00:00Z").unwrap()
        );
    }

    #[test]
    fn open_span_has_no_date_criteria() {
        let span = SearchSpan::new(None, None);
        assert_eq!(span.younger, far_future());
        assert_eq!(span.older, far_past());
        assert!(span.since.is_none() && span.before.is_none());
    }
}
