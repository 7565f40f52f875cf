//! Turning fetched messages into cache records.

use mailslice_imap::{BodyStructure, FetchedMessage};

use crate::cache::{AttachmentInfo, BodyInfo, HeaderInfo, NameAddress};
use crate::{Error, Result};

/// Default snippet length in characters.
pub const SNIPPET_LEN: usize = 100;

/// A fetched message split into what the cache stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    /// The header record.
    pub header: HeaderInfo,
    /// The body record, without text until the text part arrives.
    pub body: BodyInfo,
    /// Section holding the plain-text body, if the message has one.
    pub text_part: Option<String>,
}

/// Parses raw fetch results into header and body records.
pub trait MessageNormalizer {
    /// Builds the records for a message fetched with header fields and
    /// structure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the response lacks what was asked for.
    fn normalize(&self, message: &FetchedMessage) -> Result<NormalizedMessage>;

    /// Folds the decoded text part into the records.
    fn apply_text(&self, message: &mut NormalizedMessage, text: &str) {
        message.header.snippet = snippet(text, SNIPPET_LEN);
        message.body.body_text = Some(text.to_string());
    }
}

/// Normalizer working from the envelope header fields and BODYSTRUCTURE.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeNormalizer;

impl MessageNormalizer for EnvelopeNormalizer {
    fn normalize(&self, message: &FetchedMessage) -> Result<NormalizedMessage> {
        let structure = message.structure.as_ref().ok_or_else(|| {
            Error::Protocol(format!("FETCH for UID {} lacks BODYSTRUCTURE", message.uid))
        })?;

        let leaves = structure.leaves();
        let attachments: Vec<AttachmentInfo> = leaves
            .iter()
            .filter(|(_, part)| part.is_attachment())
            .map(|(_, part)| attachment_info(part))
            .collect();
        let text_part = leaves
            .iter()
            .find(|(_, part)| !part.is_attachment() && part.mime_type() == "text/plain")
            .map(|(section, _)| section.clone());

        let header = HeaderInfo {
            id: message.uid,
            author: message
                .header("From")
                .and_then(|v| parse_address_list(v).into_iter().next())
                .unwrap_or_default(),
            date: message.internal_date,
            flags: message.flags.clone(),
            has_attachments: !attachments.is_empty(),
            subject: message.header("Subject").unwrap_or_default().trim().to_string(),
            snippet: String::new(),
        };
        let body = BodyInfo {
            to: message.header("To").map(parse_address_list).unwrap_or_default(),
            cc: message.header("Cc").map(parse_address_list).unwrap_or_default(),
            bcc: message.header("Bcc").map(parse_address_list).unwrap_or_default(),
            reply_to: message.header("Reply-To").map(|v| v.trim().to_string()),
            attachments,
            body_text: None,
        };

        Ok(NormalizedMessage {
            header,
            body,
            text_part,
        })
    }
}

fn attachment_info(part: &BodyStructure) -> AttachmentInfo {
    let size = match part {
        BodyStructure::Single { size, .. } => u64::from(*size),
        BodyStructure::Multipart { .. } => 0,
    };
    AttachmentInfo {
        filename: part.filename().unwrap_or_default().to_string(),
        mimetype: part.mime_type(),
        size,
    }
}

/// Parses an address list such as `"Doe, Jane" <jane@example.com>, bob@example.com`.
#[must_use]
pub fn parse_address_list(value: &str) -> Vec<NameAddress> {
    split_addresses(value)
        .into_iter()
        .filter_map(|item| parse_address(item.trim()))
        .collect()
}

fn split_addresses(value: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut angle = false;
    for (i, c) in value.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '<' if !quoted => angle = true,
            '>' if !quoted => angle = false,
            ',' if !quoted && !angle => {
                items.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&value[start..]);
    items
}

fn parse_address(item: &str) -> Option<NameAddress> {
    if item.is_empty() {
        return None;
    }
    match (item.rfind('<'), item.rfind('>')) {
        (Some(open), Some(close)) if open < close => {
            let name = item[..open].trim().trim_matches('"').trim();
            let address = item[open + 1..close].trim();
            Some(NameAddress::new(name, address))
        }
        _ => Some(NameAddress::new("", item.trim_matches(|c| c == '<' || c == '>'))),
    }
}

/// Collapses whitespace and cuts the text to `max` characters.
#[must_use]
pub fn snippet(text: &str, max: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max)
        .collect()
}
