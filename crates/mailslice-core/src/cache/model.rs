//! Cached message data and the directory records that describe it.

use chrono::{DateTime, TimeDelta, Utc};
use mailslice_imap::{Flags, ModSeq, Uid};
use serde::{Deserialize, Serialize};

/// Smallest step between two distinct dates in the cache.
pub const DATE_UNIT: TimeDelta = TimeDelta::nanoseconds(1);

/// Youngest date the cache reasons about (the last instant of year 9999),
/// used for windows and sync ranges open towards the future.
#[must_use]
pub fn far_future() -> DateTime<Utc> {
    DateTime::from_timestamp(253_402_300_799, 999_999_999).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Oldest date the cache reasons about (the first instant of year 1).
#[must_use]
pub fn far_past() -> DateTime<Utc> {
    DateTime::from_timestamp(-62_135_596_800, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// A display name plus email address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameAddress {
    /// Display name, may be empty.
    pub name: String,
    /// Email address.
    pub address: String,
}

impl NameAddress {
    /// Creates a name/address pair.
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    /// Name if present, otherwise the address.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.address
        } else {
            &self.name
        }
    }
}

impl std::fmt::Display for NameAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "<{}>", self.address)
        } else {
            write!(f, "{} <{}>", self.name, self.address)
        }
    }
}

/// Summary of one message, as shown in a message list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderInfo {
    /// Server UID.
    pub id: Uid,
    /// Sender.
    pub author: NameAddress,
    /// Server internal date.
    pub date: DateTime<Utc>,
    /// Current flags.
    pub flags: Flags,
    /// Whether any part is an attachment.
    pub has_attachments: bool,
    /// Subject line.
    pub subject: String,
    /// Short preview of the body text.
    pub snippet: String,
}

impl HeaderInfo {
    /// Creates a header with empty metadata.
    #[must_use]
    pub fn new(id: Uid, date: DateTime<Utc>) -> Self {
        Self {
            id,
            author: NameAddress::default(),
            date,
            flags: Flags::new(),
            has_attachments: false,
            subject: String::new(),
            snippet: String::new(),
        }
    }
}

/// One attachment listed in a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    /// File name, empty when the part did not name one.
    pub filename: String,
    /// `type/subtype`.
    pub mimetype: String,
    /// Estimated size in bytes.
    pub size: u64,
}

/// The part of a message that is only fetched after its structure is known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyInfo {
    /// Primary recipients.
    pub to: Vec<NameAddress>,
    /// Carbon-copy recipients.
    pub cc: Vec<NameAddress>,
    /// Blind carbon-copy recipients.
    pub bcc: Vec<NameAddress>,
    /// Reply-To header, verbatim.
    pub reply_to: Option<String>,
    /// Attachments in structure order.
    pub attachments: Vec<AttachmentInfo>,
    /// Plain-text body, once fetched.
    pub body_text: Option<String>,
}

impl BodyInfo {
    /// Rough in-memory footprint, used for block sizing.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        let addresses: usize = self
            .to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(|a| a.name.len() + a.address.len() + 16)
            .sum();
        let attachments: usize = self
            .attachments
            .iter()
            .map(|a| a.filename.len() + a.mimetype.len() + 24)
            .sum();
        64 + addresses
            + attachments
            + self.reply_to.as_ref().map_or(0, String::len)
            + self.body_text.as_ref().map_or(0, String::len)
    }
}

/// Identifier of a block within a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u64);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which directory a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// Header block.
    Header,
    /// Body block.
    Body,
}

impl BlockKind {
    /// Stable name used as a storage key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Body => "body",
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory entry describing one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderBlockInfo {
    /// Block id.
    pub block_id: BlockId,
    /// Youngest date the block covers.
    pub youngest: DateTime<Utc>,
    /// Oldest date the block covers.
    pub oldest: DateTime<Utc>,
    /// Number of entries.
    pub count: usize,
    /// Estimated size in bytes.
    pub est_size: usize,
}

/// Provenance of a fully synchronized date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullSync {
    /// HIGHESTMODSEQ at the time of the sync, if the server reports one.
    pub highest_modseq: Option<ModSeq>,
    /// When the sync completed.
    pub updated_at: DateTime<Utc>,
}

/// A date span annotated with how the cache learned about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccuracyRange {
    /// Youngest date covered.
    pub youngest: DateTime<Utc>,
    /// Oldest date covered.
    pub oldest: DateTime<Utc>,
    /// `None` when only search-derived.
    pub full_sync: Option<FullSync>,
}

/// Everything a folder keeps resident: its three directories plus the id
/// allocator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderInfo {
    /// Accuracy ranges, youngest first.
    pub accuracy: Vec<AccuracyRange>,
    /// Header block directory, youngest first.
    pub header_blocks: Vec<FolderBlockInfo>,
    /// Body block directory, youngest first.
    pub body_blocks: Vec<FolderBlockInfo>,
    /// Next unused block id, shared by both kinds.
    pub next_block_id: u64,
}

/// A date window a subscriber is interested in, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    /// Youngest date of interest.
    pub youngest: DateTime<Utc>,
    /// Oldest date of interest.
    pub oldest: DateTime<Utc>,
}

impl DateWindow {
    /// Creates a window.
    #[must_use]
    pub const fn new(youngest: DateTime<Utc>, oldest: DateTime<Utc>) -> Self {
        Self { youngest, oldest }
    }

    /// Window from `oldest` open towards the future.
    #[must_use]
    pub fn since(oldest: DateTime<Utc>) -> Self {
        Self::new(far_future(), oldest)
    }

    /// Returns true if `date` falls in the window.
    #[must_use]
    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        date <= self.youngest && date >= self.oldest
    }

    /// Returns true if `[oldest, youngest]` intersects the window.
    #[must_use]
    pub fn overlaps(&self, youngest: DateTime<Utc>, oldest: DateTime<Utc>) -> bool {
        youngest >= self.oldest && oldest <= self.youngest
    }
}

/// Sync status reported to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceStatus {
    /// A sync pass is running.
    Synchronizing,
    /// The last pass completed.
    Synced,
    /// The last pass aborted; cached data is still usable.
    Failed(String),
}

impl std::fmt::Display for SliceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synchronizing => f.write_str("synchronizing"),
            Self::Synced => f.write_str("synced"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn name_address_display() {
        assert_eq!(
            NameAddress::new("Ada", "ada@example.com").to_string(),
            "Ada <ada@example.com>"
        );
        assert_eq!(NameAddress::new("", "x@y.z").display_name(), "x@y.z");
    }

    #[test]
    fn window_overlap() {
        let t = DateTime::from_timestamp(1_000_000, 0).unwrap();
        let window = DateWindow::new(t, t - TimeDelta::hours(1));
        assert!(window.contains(t));
        assert!(!window.contains(t + DATE_UNIT));
        assert!(window.overlaps(t + TimeDelta::hours(1), t));
        assert!(!window.overlaps(t - TimeDelta::hours(2), t - TimeDelta::hours(3)));
        assert!(DateWindow::since(t).contains(far_future()));
    }

    #[test]
    fn open_bounds_survive_json() {
        for date in [far_future(), far_past()] {
            let json = serde_json::to_string(&date).unwrap();
            assert_eq!(serde_json::from_str::<DateTime<Utc>>(&json).unwrap(), date);
        }
    }

    #[test]
    fn body_size_grows_with_text() {
        let mut body = BodyInfo::default();
        let empty = body.estimated_size();
        body.body_text = Some("x".repeat(1000));
        assert_eq!(body.estimated_size(), empty + 1000);
    }

    #[test]
    fn header_serializes_as_json() {
        let mut header = HeaderInfo::new(Uid::new(42).unwrap(), DateTime::UNIX_EPOCH);
        header.subject = "hello".into();
        let json = serde_json::to_string(&header).unwrap();
        assert!(json.contains("\"id\":42"));
        assert_eq!(serde_json::from_str::<HeaderInfo>(&json).unwrap(), header);
    }
}
