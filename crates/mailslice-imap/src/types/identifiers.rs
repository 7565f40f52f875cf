//! Message identifiers.
//!
//! Types for UIDs and CONDSTORE modification sequences.

use std::num::{NonZeroU32, NonZeroU64};

/// Unique identifier for a message.
///
/// UIDs are persistent identifiers that don't change when messages are expunged.
/// Within one folder (and one UIDVALIDITY epoch) a UID names the same message
/// for its whole lifetime, which is what lets the local cache key headers and
/// bodies by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct Uid(pub NonZeroU32);

impl Uid {
    /// Creates a new UID.
    ///
    /// Returns `None` if the value is 0.
    #[must_use]
    pub fn new(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self)
    }

    /// Returns the underlying value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Modification sequence number (MODSEQ).
///
/// Each message has a MODSEQ value that increases whenever the message's
/// metadata (flags, annotations, etc.) changes. The server also maintains
/// a HIGHESTMODSEQ for each mailbox, which is what a completed range sync
/// records as its provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct ModSeq(NonZeroU64);

impl ModSeq {
    /// Creates a new `ModSeq` from a u64, returning `None` if zero.
    #[must_use]
    pub fn from_u64(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(Self)
    }

    /// Returns the raw value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for ModSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u64> for ModSeq {
    type Error = &'static str;

    fn try_from(value: u64) -> std::result::Result<Self, Self::Error> {
        Self::from_u64(value).ok_or("ModSeq cannot be zero")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::unreadable_literal)]
mod tests {
    use super::*;

    mod uid_tests {
        use super::*;

        #[test]
        fn new_zero_returns_none() {
            assert!(Uid::new(0).is_none());
        }

        #[test]
        fn display() {
            let uid = Uid::new(12345).unwrap();
            assert_eq!(format!("{uid}"), "12345");
        }

        #[test]
        fn ordering() {
            let uid1 = Uid::new(100).unwrap();
            let uid2 = Uid::new(200).unwrap();
            assert!(uid1 < uid2);
        }
    }

    mod modseq_tests {
        use super::*;

        #[test]
        fn creation() {
            let modseq = ModSeq::from_u64(100);
            assert_eq!(modseq.unwrap().get(), 100);
            assert!(ModSeq::from_u64(0).is_none());
        }

        #[test]
        fn try_from() {
            let result: std::result::Result<ModSeq, _> = 987654321u64.try_into();
            assert_eq!(result.unwrap().to_string(), "987654321");

            let result: std::result::Result<ModSeq, _> = 0u64.try_into();
            assert!(result.is_err());
        }
    }
}
