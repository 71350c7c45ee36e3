//! SMTP server implementation

pub mod commands;
pub mod error;
pub mod message;
pub mod pool;
pub mod response;
pub mod server;
pub mod session;
pub mod signal;

pub use commands::SmtpCommand;
pub use error::{Result, SmtpError, SmtpLimits};
pub use message::MailMessage;
pub use pool::WorkerPool;
pub use response::{SmtpReply, SmtpResponse};
pub use server::{ServerOptions, SmtpServer};
pub use session::{SmtpSession, SmtpState};
pub use signal::StopSignal;
