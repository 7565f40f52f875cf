//! Core IMAP types.
//!
//! Identifiers and flags shared by the search/fetch boundary and the local
//! cache, following RFC 9051 (`IMAP4rev2`) and RFC 7162 (CONDSTORE).

#![allow(clippy::missing_const_for_fn)]

mod flags;
mod identifiers;

pub use flags::{Flag, Flags};
pub use identifiers::{ModSeq, Uid};
