//! # Catchmail
//!
//! Catchmail is an embedded SMTP server that captures mail for testing.
//!
//! Start a server inside a test, point the code under test at it, then
//! inspect what arrived. No mocks and no real mail delivery.
//!
//! ## Quick Start
//!
//! ```rust
//! use catchmail::{ServerOptions, SmtpServer};
//!
//! // Port 0 picks a free port
//! let mut server = SmtpServer::start(ServerOptions {
//!     port: 0,
//!     ..ServerOptions::default()
//! })?;
//!
//! // Application sends email to server.local_addr()
//! // ...
//!
//! // Wait up to 100 ms for one message, then check what arrived
//! if server.anticipate_message_count_for(1, 100)? > 0 {
//!     let message = server.message(0)?;
//!     println!("Received: {:?}", message.subject());
//! }
//!
//! server.stop();
//! # Ok::<(), catchmail::SmtpError>(())
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `HELO` / `EHLO` - Identify the client
//! - `MAIL FROM` - Specify the sender's address
//! - `RCPT TO` - Specify the destination (multiple destinations are supported)
//! - `DATA` - Send the message headers and body
//! - `RSET` - Reset the current transaction
//! - `NOOP` - Do nothing
//! - `VRFY`, `EXPN`, `LIST` - Answered with `252`
//! - `HELP` - Answered with `211`
//! - `QUIT` - Close connection after a completed message
//!
//! ## Mail stores
//!
//! Completed messages go to a [`MailStore`]. Two ship with the crate and are
//! picked by [`MailStoreKind`]:
//!
//! - [`RollingMailStore`] (default) keeps the last 100 messages in memory.
//! - [`EmlMailStore`] writes each message to `<n>_<subject>.eml` and loads
//!   existing files when it starts.
//!
//! Any other `MailStore` can be passed to [`SmtpServer::start_with_store`].
//!
//! ## Notes
//!
//! - SMTP authentication is not supported.
//! - SSL/TLS connection is not supported.
//! - Mail relay is not supported.
//! - Messages are stored as received. MIME parts are not decoded.
//!
//! ## Size Limits
//!
//! The server enforces the RFC 5321 line limits (see [`SmtpLimits`]):
//! - Command lines: 512 characters max, longer lines get `500`
//! - Text lines: 1000 characters max, a longer line ends the connection
//! - Message data: 10 MiB by default, configurable through
//!   [`ServerOptions::max_message_size`]; larger messages get `552`
//!
//! ## Logging
//!
//! The crate logs through [`tracing`]. Install a subscriber to see what the
//! server is doing; nothing is printed otherwise.

mod smtp;
pub mod store;

pub use smtp::{
    MailMessage, Result, ServerOptions, SmtpCommand, SmtpError, SmtpReply, SmtpResponse,
    SmtpLimits, SmtpServer, SmtpSession, SmtpState, StopSignal, WorkerPool,
};
pub use store::{EmlMailStore, MailStore, MailStoreKind, RollingMailStore};
