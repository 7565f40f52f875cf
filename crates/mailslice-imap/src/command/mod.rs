//! Command vocabulary for the folder synchronizer.
//!
//! The synchronizer only ever issues two kinds of commands against a selected
//! folder: UID SEARCH (to learn which messages exist in a date range) and
//! UID FETCH (to learn about those messages). This module describes both in a
//! transport-neutral way; [`std::fmt::Display`] renders the IMAP text form so
//! a connection can put it on the wire and logs stay readable.

mod serialize;

use chrono::NaiveDate;

pub use serialize::{write_fetch_spec, write_search_criteria, write_search_program};

/// SEARCH criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    /// All messages.
    All,
    /// Messages with \Answered flag.
    Answered,
    /// Messages with \Deleted flag.
    Deleted,
    /// Messages with \Draft flag.
    Draft,
    /// Messages with \Flagged flag.
    Flagged,
    /// Messages with \Seen flag.
    Seen,
    /// Messages without \Seen flag.
    Unseen,
    /// Subject contains text.
    Subject(String),
    /// From contains text.
    From(String),
    /// Text in header or body.
    Text(String),
    /// Internal date on or after the given day.
    Since(NaiveDate),
    /// Internal date strictly before the given day.
    Before(NaiveDate),
    /// Internal date within the given day.
    On(NaiveDate),
    /// Messages with mod-sequence greater than value (CONDSTORE).
    ModSeq(u64),
    /// OR of criteria.
    Or(Box<Self>, Box<Self>),
    /// NOT of criteria.
    Not(Box<Self>),
}

impl SearchCriteria {
    /// Negates a criterion.
    #[must_use]
    pub fn not(criteria: Self) -> Self {
        Self::Not(Box::new(criteria))
    }

    /// Combines two criteria with OR.
    #[must_use]
    pub fn or(a: Self, b: Self) -> Self {
        Self::Or(Box::new(a), Box::new(b))
    }
}

impl std::fmt::Display for SearchCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buf = Vec::new();
        write_search_criteria(&mut buf, self);
        f.write_str(&String::from_utf8_lossy(&buf))
    }
}

/// What a UID FETCH should return for each message.
///
/// `FLAGS` and `INTERNALDATE` are always part of the response, so the
/// flags-only variant is simply the empty request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSpec {
    /// Selected header fields, optionally with the MIME structure.
    Headers {
        /// Header field names, e.g. `FROM`, `SUBJECT`.
        fields: Vec<String>,
        /// Whether to include BODYSTRUCTURE.
        structure: bool,
    },
    /// Only flags (and internal date).
    Flags,
    /// Decoded content of the given body sections, e.g. `1` or `1.2`.
    BodyParts(Vec<String>),
}

impl FetchSpec {
    /// Header fields plus structure, the request used for messages the cache
    /// has never seen.
    #[must_use]
    pub fn headers_with_structure<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Headers {
            fields: fields.into_iter().map(Into::into).collect(),
            structure: true,
        }
    }

    /// Body sections for a single follow-up fetch.
    #[must_use]
    pub fn body_part(section: impl Into<String>) -> Self {
        Self::BodyParts(vec![section.into()])
    }
}

impl std::fmt::Display for FetchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buf = Vec::new();
        write_fetch_spec(&mut buf, self);
        f.write_str(&String::from_utf8_lossy(&buf))
    }
}
