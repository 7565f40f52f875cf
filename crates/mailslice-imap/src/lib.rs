//! # mailslice-imap
//!
//! IMAP-facing vocabulary for the mailslice synchronization layer.
//!
//! This crate does not speak the wire protocol itself. It defines the types a
//! folder synchronizer exchanges with whatever connection owns the socket:
//!
//! - **Identifiers**: [`Uid`] and the CONDSTORE [`ModSeq`]
//! - **Flags**: [`Flag`] and the set-like [`Flags`] collection
//! - **Commands**: [`SearchCriteria`] (rendered as IMAP SEARCH keys) and
//!   [`FetchSpec`] describing what a FETCH should return
//! - **Results**: [`FetchedMessage`] and its [`BodyStructure`]
//! - **Boundary**: the [`RemoteFolder`] trait a connection implements
//!
//! ## Example
//!
//! ```ignore
//! use mailslice_imap::{FetchSpec, RemoteFolder, SearchCriteria};
//!
//! let criteria = vec![SearchCriteria::not(SearchCriteria::Draft)];
//! let uids = remote.search(&criteria).await?;
//!
//! let mut stream = remote.fetch(&uids, &FetchSpec::Flags).await?;
//! while let Some(message) = stream.recv().await {
//!     let message = message?;
//!     println!("{} {}", message.uid, message.flags);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
mod error;
pub mod message;
pub mod remote;
pub mod types;

pub use command::{FetchSpec, SearchCriteria};
pub use error::{Error, Result};
pub use message::{BodyStructure, FetchedMessage};
pub use remote::{FetchSender, FetchStream, RemoteFolder, fetch_channel};
pub use types::{Flag, Flags, ModSeq, Uid};
