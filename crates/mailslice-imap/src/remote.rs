//! The remote folder boundary.
//!
//! A [`RemoteFolder`] is a connection with one folder selected. The
//! synchronizer drives it through two operations, SEARCH and FETCH, and asks
//! it to re-establish itself when a command fails because the link died.
//! How the connection is pooled, authenticated or retried on a schedule is up
//! to the implementor.
//!
//! FETCH results stream: each message is delivered as soon as the server has
//! finished sending it, and the stream ends when the tagged completion
//! arrives. An `Err` item means the command failed part way through; anything
//! delivered before it is still valid.

use tokio::sync::mpsc;

use crate::command::{FetchSpec, SearchCriteria};
use crate::error::Result;
use crate::message::FetchedMessage;
use crate::types::{ModSeq, Uid};

/// Default buffer size for fetch streams.
pub const FETCH_STREAM_BUFFER: usize = 64;

/// Receiving half of a streamed FETCH.
pub type FetchStream = mpsc::Receiver<Result<FetchedMessage>>;

/// Sending half of a streamed FETCH, held by the connection.
pub type FetchSender = mpsc::Sender<Result<FetchedMessage>>;

/// Creates a connected sender/stream pair for one FETCH command.
#[must_use]
pub fn fetch_channel() -> (FetchSender, FetchStream) {
    mpsc::channel(FETCH_STREAM_BUFFER)
}

/// A connection with a folder selected.
#[allow(async_fn_in_trait)]
pub trait RemoteFolder {
    /// Runs `UID SEARCH` with the given criteria ANDed together.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is rejected or the connection drops.
    async fn search(&self, criteria: &[SearchCriteria]) -> Result<Vec<Uid>>;

    /// Issues `UID FETCH` for the given UIDs and returns the result stream.
    ///
    /// Returning does not wait for the results, so several fetches may be
    /// outstanding at once and their completions may interleave.
    ///
    /// # Errors
    ///
    /// Returns an error if the command could not be issued.
    async fn fetch(&self, uids: &[Uid], spec: &FetchSpec) -> Result<FetchStream>;

    /// Re-establishes the connection and re-selects the folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be reached.
    async fn reconnect(&self) -> Result<()>;

    /// HIGHESTMODSEQ reported when the folder was selected, if the server
    /// supports CONDSTORE.
    fn highest_modseq(&self) -> Option<ModSeq> {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Flags;
    use chrono::Utc;

    #[tokio::test]
    async fn stream_delivers_then_ends() {
        let (tx, mut rx) = fetch_channel();
        let uid = Uid::new(9).unwrap();
        tx.send(Ok(FetchedMessage::new(uid, Utc::now(), Flags::new())))
            .await
            .unwrap();
        drop(tx);

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.uid, uid);
        assert!(rx.recv().await.is_none());
    }
}
