//! Mail stores: where completed messages go once a session commits them
//!
//! Two implementations ship with the crate:
//!
//! - [`RollingMailStore`] keeps the most recent messages in memory and
//!   evicts the oldest one when it is full.
//! - [`EmlMailStore`] writes every message to its own `.eml` file and
//!   recovers existing files the first time it is used.
//!
//! [`MailStoreKind`] selects between them by name.

mod eml;
mod rolling;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::smtp::error::{Result, SmtpError};
use crate::smtp::message::MailMessage;

pub use eml::{EmlMailStore, is_eml_filename, sanitize_filename};
pub use rolling::RollingMailStore;

/// Storage shared by every session of a server.
///
/// Implementations must be safe to call from many sessions at once.
/// `messages` returns a snapshot that later changes to the store do not
/// affect.
pub trait MailStore: Send + Sync {
    /// Store a completed message
    fn add(&self, message: MailMessage) -> Result<()>;

    /// Snapshot of every stored message in insertion order
    fn messages(&self) -> Result<Vec<Arc<MailMessage>>>;

    /// Message at `index`, or [`SmtpError::IndexOutOfRange`]
    fn message(&self, index: usize) -> Result<Arc<MailMessage>>;

    /// Number of stored messages
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every stored message
    fn clear(&self) -> Result<()>;
}

/// Registry of the available mail store implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MailStoreKind {
    /// Bounded in-memory store, see [`RollingMailStore`]
    #[default]
    Rolling,
    /// One file per message, see [`EmlMailStore`]
    Eml,
}

impl MailStoreKind {
    /// Construct a store of this kind.
    ///
    /// `capacity` only applies to the rolling store and `directory` only to
    /// the EML store.
    pub fn create(self, capacity: usize, directory: PathBuf) -> Result<Arc<dyn MailStore>> {
        Ok(match self {
            Self::Rolling => Arc::new(RollingMailStore::with_capacity(capacity)?),
            Self::Eml => Arc::new(EmlMailStore::new(directory)),
        })
    }
}

impl FromStr for MailStoreKind {
    type Err = SmtpError;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rolling" | "rollingmailstore" | "memory" => Ok(Self::Rolling),
            "eml" | "emlmailstore" | "file" => Ok(Self::Eml),
            _ => Err(SmtpError::UnknownMailStore(name.to_owned())),
        }
    }
}

impl fmt::Display for MailStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rolling => f.write_str("RollingMailStore"),
            Self::Eml => f.write_str("EMLMailStore"),
        }
    }
}
