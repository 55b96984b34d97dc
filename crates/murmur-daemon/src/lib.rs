//! Murmur client daemon.
//!
//! The long-lived per-account process: it watches an outbox tree for
//! user-authored messages, maintains an encrypted session per peer,
//! exchanges envelopes with mailbox servers, and files decrypted messages
//! into a conversations tree. The filesystem is the UI surface; the
//! network side is the home server's push stream plus direct connections
//! to peers' home servers.
//!
//! See [`engine`] for the main loop, [`resolver`] for how claimed sender
//! names become authenticated keys, and [`paths`] for the on-disk layout.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod engine;
mod error;
pub mod outbox;
pub mod paths;
pub mod prekeys;
pub mod resolver;
pub mod store;

pub use config::{AccountConfig, MAX_PREKEYS, MIN_PREKEYS};
pub use engine::{Engine, run};
pub use error::DaemonError;
