//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use mailslice_core::{
    AccuracyRange, Clock, Config, FolderBlockInfo, FolderCache, HeaderInfo, SqliteStore,
    SystemClock,
};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Opens (creating if needed) the cache database.
pub async fn open_store(path: &Path) -> Result<SqliteStore> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    SqliteStore::new(&path.to_string_lossy())
        .await
        .with_context(|| format!("Failed to open cache database {}", path.display()))
}

async fn open_folder(
    store: SqliteStore,
    config: &Config,
    folder: &str,
) -> Result<(FolderCache<SqliteStore>, Arc<dyn Clock>)> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = FolderCache::open(folder, store, Arc::clone(&clock), config.cache.clone())
        .await
        .with_context(|| format!("Failed to open folder {folder}"))?;
    Ok((cache, clock))
}

#[derive(Serialize)]
struct Listing<'a> {
    folder: &'a str,
    fresh: bool,
    headers: &'a [HeaderInfo],
}

/// Prints the cached headers of the last `days` days.
pub async fn list(
    store: SqliteStore,
    config: &Config,
    folder: &str,
    days: i64,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let (cache, clock) = open_folder(store, config, folder).await?;
    let now = clock.now();
    let older = clock.days_ago(days);
    let limit = limit.unwrap_or(config.cache.too_many_messages);

    let mut headers = Vec::new();
    cache
        .get_messages_in_date_range(now, older, limit, |batch| {
            let room = limit.saturating_sub(headers.len());
            headers.extend(batch.headers.into_iter().take(room));
        })
        .await
        .context("Failed to read cached headers")?;
    let fresh = cache.is_range_fresh(now, older);
    tracing::debug!(folder, count = headers.len(), fresh, "Listed cached headers");

    if json {
        let listing = Listing {
            folder,
            fresh,
            headers: &headers,
        };
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    for header in &headers {
        println!("{}", header_line(header));
    }
    if headers.is_empty() {
        println!("No cached messages in the last {days} days.");
    }
    if !fresh {
        println!("Cache is stale for this range; run a sync to refresh it.");
    }
    Ok(())
}

fn header_line(header: &HeaderInfo) -> String {
    let marker = if header.flags.is_seen() { ' ' } else { '*' };
    let clip = if header.has_attachments { '@' } else { ' ' };
    let from: String = header.author.display_name().chars().take(24).collect();
    format!(
        "{marker}{clip} {:>8}  {}  {from:<24}  {}",
        header.id,
        header.date.format(DATE_FORMAT),
        header.subject
    )
}

#[derive(Serialize)]
struct Directories<'a> {
    folder: &'a str,
    accuracy: Vec<AccuracyRange>,
    header_blocks: Vec<FolderBlockInfo>,
    body_blocks: Vec<FolderBlockInfo>,
}

/// Prints the accuracy ranges and both block directories.
pub async fn accuracy(store: SqliteStore, config: &Config, folder: &str, json: bool) -> Result<()> {
    let (cache, clock) = open_folder(store, config, folder).await?;
    let directories = Directories {
        folder,
        accuracy: cache.accuracy(),
        header_blocks: cache.header_directory(),
        body_blocks: cache.body_directory(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&directories)?);
        return Ok(());
    }

    println!("Accuracy ranges for {folder}:");
    if directories.accuracy.is_empty() {
        println!("  (none)");
    }
    for range in &directories.accuracy {
        println!("  {}", accuracy_line(range, clock.now(), config));
    }

    for (title, blocks) in [
        ("Header blocks", &directories.header_blocks),
        ("Body blocks", &directories.body_blocks),
    ] {
        println!("{title}:");
        if blocks.is_empty() {
            println!("  (none)");
        }
        for block in blocks {
            println!(
                "  #{:<6} {} .. {}  {:>5} entries  {:>7} bytes",
                block.block_id,
                block.youngest.format(DATE_FORMAT),
                block.oldest.format(DATE_FORMAT),
                block.count,
                block.est_size
            );
        }
    }
    Ok(())
}

fn accuracy_line(range: &AccuracyRange, now: DateTime<Utc>, config: &Config) -> String {
    let span = format!(
        "{} .. {}",
        range.youngest.format(DATE_FORMAT),
        range.oldest.format(DATE_FORMAT)
    );
    match &range.full_sync {
        None => format!("{span}  search only"),
        Some(sync) => {
            let age = now - sync.updated_at;
            let state = if age <= config.cache.recent_enough() {
                "fresh"
            } else {
                "stale"
            };
            let modseq = sync
                .highest_modseq
                .map_or_else(|| "-".to_string(), |m| m.to_string());
            format!(
                "{span}  synced {} ({state}, modseq {modseq})",
                sync.updated_at.format(DATE_FORMAT)
            )
        }
    }
}
