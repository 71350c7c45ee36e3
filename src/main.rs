//! Standalone catchmail server: captures mail until interrupted

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Context;
use catchmail::{
    EmlMailStore, MailStoreKind, RollingMailStore, ServerOptions, SmtpLimits, SmtpServer,
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "catchmail")]
#[command(about = "SMTP server that captures mail for inspection", version)]
struct Args {
    /// Port to listen on
    #[arg(default_value_t = ServerOptions::DEFAULT_PORT)]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Name used in the greeting and replies
    #[arg(long, default_value = "localhost")]
    hostname: String,

    /// Mail store to use (rolling or eml)
    #[arg(long, default_value_t = MailStoreKind::Rolling)]
    mail_store: MailStoreKind,

    /// Serve clients concurrently
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    threaded: bool,

    /// Worker threads when threaded
    #[arg(long, default_value_t = ServerOptions::DEFAULT_THREADS)]
    threads: usize,

    /// Messages kept by the rolling store
    #[arg(long, default_value_t = RollingMailStore::DEFAULT_CAPACITY)]
    capacity: usize,

    /// Directory for the eml store
    #[arg(long, default_value = EmlMailStore::DEFAULT_DIRECTORY)]
    eml_dir: PathBuf,

    /// Delay before every reply, in milliseconds
    #[arg(long, default_value_t = 0)]
    wait_in_response: u64,

    /// Drop idle clients after this many seconds
    #[arg(long, default_value_t = ServerOptions::DEFAULT_READ_TIMEOUT.as_secs())]
    read_timeout: u64,

    /// Largest message accepted, in bytes
    #[arg(long, default_value_t = SmtpLimits::MAX_DATA_SIZE)]
    max_message_size: usize,
}

impl From<Args> for ServerOptions {
    fn from(args: Args) -> Self {
        Self {
            host: args.bind.to_string(),
            port: args.port,
            hostname: args.hostname,
            threaded: args.threaded,
            threads: args.threads,
            mail_store: args.mail_store,
            capacity: args.capacity,
            eml_directory: args.eml_dir,
            wait_in_response: Duration::from_millis(args.wait_in_response),
            read_timeout: Duration::from_secs(args.read_timeout),
            max_message_size: args.max_message_size,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(
        store = %args.mail_store,
        threaded = args.threaded,
        "Starting catchmail"
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        tx.send(()).ok();
    })
    .context("failed to install interrupt handler")?;

    let mut server = SmtpServer::start(args.into()).context("failed to start server")?;

    // Block until interrupted
    rx.recv().ok();

    server.stop();
    let count = server.email_count().context("failed to count messages")?;
    info!(count, "Received {count} messages in total");

    Ok(())
}
