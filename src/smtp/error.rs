//! Error types for the SMTP server and its mail stores

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message index {index} out of range (store holds {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Unknown mail store: {0}")]
    UnknownMailStore(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Could not initialise mail store at {path}: {source}")]
    StoreInit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not write message to {path}: {source}")]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Specialized `Result` type for server and store operations.
pub type Result<T> = std::result::Result<T, SmtpError>;

/// SMTP size limits (RFC 5321 section 4.5.3.1)
pub struct SmtpLimits;

impl SmtpLimits {
    /// Maximum length of a command line including CRLF
    pub const COMMAND_LINE_MAX_LENGTH: usize = 512;

    /// Maximum length of a text line including CRLF
    pub const TEXT_LINE_MAX_LENGTH: usize = 1000;

    /// Maximum total size of message data (reasonable limit for in-memory storage)
    pub const MAX_DATA_SIZE: usize = 10 * 1024 * 1024; // 10MB
}
