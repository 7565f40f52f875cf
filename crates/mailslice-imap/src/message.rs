//! Per-message FETCH results.

use chrono::{DateTime, Utc};

use crate::types::{Flags, ModSeq, Uid};

/// One message's worth of FETCH data.
///
/// Which fields are populated depends on the [`crate::FetchSpec`] that was
/// requested; `uid`, `flags` and `internal_date` are always present.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedMessage {
    /// Message UID.
    pub uid: Uid,
    /// Server internal date.
    pub internal_date: DateTime<Utc>,
    /// Current flags.
    pub flags: Flags,
    /// Per-message MODSEQ when the server supports CONDSTORE.
    pub modseq: Option<ModSeq>,
    /// Requested header fields as `(name, unfolded value)` pairs.
    pub header_fields: Vec<(String, String)>,
    /// BODYSTRUCTURE, when requested.
    pub structure: Option<BodyStructure>,
    /// Decoded body sections as `(section, text)` pairs.
    pub parts: Vec<(String, String)>,
}

impl FetchedMessage {
    /// Creates a message carrying only the always-present attributes.
    #[must_use]
    pub const fn new(uid: Uid, internal_date: DateTime<Utc>, flags: Flags) -> Self {
        Self {
            uid,
            internal_date,
            flags,
            modseq: None,
            header_fields: Vec::new(),
            structure: None,
            parts: Vec::new(),
        }
    }

    /// Returns the first value of a header field (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the decoded text of a body section.
    #[must_use]
    pub fn part(&self, section: &str) -> Option<&str> {
        self.parts
            .iter()
            .find(|(s, _)| s == section)
            .map(|(_, text)| text.as_str())
    }
}

/// Body structure (simplified).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyStructure {
    /// Single-part body.
    Single {
        /// MIME type.
        media_type: String,
        /// MIME subtype.
        media_subtype: String,
        /// Body parameters (`charset`, `name`, ...).
        params: Vec<(String, String)>,
        /// Content-Disposition type, e.g. `attachment` or `inline`.
        disposition: Option<String>,
        /// Content-Disposition parameters (`filename`, ...).
        disposition_params: Vec<(String, String)>,
        /// Body size in bytes, as encoded on the server.
        size: u32,
    },
    /// Multipart body.
    Multipart {
        /// Multipart subtype.
        subtype: String,
        /// Child body parts.
        bodies: Vec<Self>,
    },
}

impl BodyStructure {
    /// Convenience constructor for a leaf part.
    #[must_use]
    pub fn single(media_type: &str, media_subtype: &str, size: u32) -> Self {
        Self::Single {
            media_type: media_type.to_string(),
            media_subtype: media_subtype.to_string(),
            params: Vec::new(),
            disposition: None,
            disposition_params: Vec::new(),
            size,
        }
    }

    /// Returns the `type/subtype` string of a leaf, lowercased.
    #[must_use]
    pub fn mime_type(&self) -> String {
        match self {
            Self::Single {
                media_type,
                media_subtype,
                ..
            } => format!(
                "{}/{}",
                media_type.to_lowercase(),
                media_subtype.to_lowercase()
            ),
            Self::Multipart { subtype, .. } => format!("multipart/{}", subtype.to_lowercase()),
        }
    }

    /// Returns the filename from the disposition or the `name` parameter.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        let Self::Single {
            params,
            disposition_params,
            ..
        } = self
        else {
            return None;
        };
        find_param(disposition_params, "filename").or_else(|| find_param(params, "name"))
    }

    /// Returns true if this leaf should be presented as an attachment.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        match self {
            Self::Single { disposition, .. } => {
                disposition
                    .as_deref()
                    .is_some_and(|d| d.eq_ignore_ascii_case("attachment"))
                    || self.filename().is_some()
            }
            Self::Multipart { .. } => false,
        }
    }

    /// Returns every leaf part paired with its IMAP section number.
    ///
    /// A non-multipart message has a single part numbered `1`.
    #[must_use]
    pub fn leaves(&self) -> Vec<(String, &Self)> {
        let mut out = Vec::new();
        match self {
            Self::Single { .. } => out.push(("1".to_string(), self)),
            Self::Multipart { bodies, .. } => collect_leaves(bodies, "", &mut out),
        }
        out
    }
}

fn collect_leaves<'a>(bodies: &'a [BodyStructure], prefix: &str, out: &mut Vec<(String, &'a BodyStructure)>) {
    for (i, body) in bodies.iter().enumerate() {
        let section = if prefix.is_empty() {
            format!("{}", i + 1)
        } else {
            format!("{prefix}.{}", i + 1)
        };
        match body {
            BodyStructure::Single { .. } => out.push((section, body)),
            BodyStructure::Multipart { bodies, .. } => collect_leaves(bodies, &section, out),
        }
    }
}

fn find_param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
