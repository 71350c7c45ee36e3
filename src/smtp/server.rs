//! SMTP server implementation

use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, info_span, trace, warn};

use crate::smtp::error::{Result, SmtpError, SmtpLimits};
use crate::smtp::message::MailMessage;
use crate::smtp::pool::WorkerPool;
use crate::smtp::session::SmtpSession;
use crate::smtp::signal::StopSignal;
use crate::store::{EmlMailStore, MailStore, MailStoreKind, RollingMailStore};

/// How long the accept thread parks between polls of the listener
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Sleep between polls in [`SmtpServer::anticipate_message_count_for`]
const ANTICIPATE_TICK: Duration = Duration::from_millis(1);

/// Configuration for [`SmtpServer::start`]
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Address to bind to
    pub host: String,
    /// Port to listen on; `0` picks a free port
    pub port: u16,
    /// Name the server uses in its greeting and replies
    pub hostname: String,
    /// Serve clients concurrently. When `false` the pool has one worker.
    pub threaded: bool,
    /// Worker pool size when `threaded` is set
    pub threads: usize,
    pub mail_store: MailStoreKind,
    /// Capacity of the rolling store
    pub capacity: usize,
    /// Directory of the EML store
    pub eml_directory: PathBuf,
    /// Delay before every reply
    pub wait_in_response: Duration,
    /// Idle time after which a client connection is dropped
    pub read_timeout: Duration,
    /// Largest message accepted, in bytes of DATA including line endings
    pub max_message_size: usize,
}

impl ServerOptions {
    pub const DEFAULT_PORT: u16 = 25;
    pub const DEFAULT_THREADS: usize = 10;
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

    /// Number of workers the server will run with these options
    pub fn pool_size(&self) -> usize {
        if self.threaded { self.threads } else { 1 }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: Self::DEFAULT_PORT,
            hostname: "localhost".to_owned(),
            threaded: true,
            threads: Self::DEFAULT_THREADS,
            mail_store: MailStoreKind::default(),
            capacity: RollingMailStore::DEFAULT_CAPACITY,
            eml_directory: PathBuf::from(EmlMailStore::DEFAULT_DIRECTORY),
            wait_in_response: Duration::ZERO,
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
            max_message_size: SmtpLimits::MAX_DATA_SIZE,
        }
    }
}

/// A running SMTP server that captures every message it receives.
///
/// The server is listening as soon as [`start`](Self::start) returns.
/// Dropping the handle stops it.
///
/// ```no_run
/// use catchmail::{ServerOptions, SmtpServer};
///
/// let mut server = SmtpServer::start(ServerOptions {
///     port: 0,
///     ..ServerOptions::default()
/// })?;
/// println!("listening on {}", server.local_addr());
///
/// // ... send mail to the server ...
///
/// for message in server.messages()? {
///     println!("{}", message.subject().unwrap_or_default());
/// }
/// server.stop();
/// # Ok::<(), catchmail::SmtpError>(())
/// ```
pub struct SmtpServer {
    local_addr: SocketAddr,
    store: Arc<dyn MailStore>,
    running: Arc<AtomicBool>,
    stop: StopSignal,
    acceptor: Option<JoinHandle<()>>,
}

/// Everything a session job needs, shared by all jobs
struct SessionContext {
    store: Arc<dyn MailStore>,
    hostname: String,
    wait_in_response: Duration,
    read_timeout: Duration,
    max_message_size: usize,
    stop: StopSignal,
}

impl SmtpServer {
    /// Create the configured mail store, bind and start accepting clients
    pub fn start(options: ServerOptions) -> Result<Self> {
        let store = options
            .mail_store
            .create(options.capacity, options.eml_directory.clone())?;
        Self::start_with_store(options, store)
    }

    /// Start with a caller-supplied store. The store options in `options`
    /// are ignored.
    pub fn start_with_store(options: ServerOptions, store: Arc<dyn MailStore>) -> Result<Self> {
        let pool = WorkerPool::new(options.pool_size())?;
        let workers = pool.size();

        let listener = TcpListener::bind((options.host.as_str(), options.port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let running = Arc::new(AtomicBool::new(true));
        let stop = StopSignal::new();
        let context = Arc::new(SessionContext {
            store: Arc::clone(&store),
            hostname: options.hostname,
            wait_in_response: options.wait_in_response,
            read_timeout: options.read_timeout,
            max_message_size: options.max_message_size,
            stop: stop.clone(),
        });

        let acceptor = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("smtp-acceptor".to_owned())
                .spawn(move || accept_loop(&listener, pool, &context, &running))?
        };

        info!(
            addr = %local_addr,
            workers,
            "SMTP server listening"
        );

        Ok(Self {
            local_addr,
            store,
            running,
            stop,
            acceptor: Some(acceptor),
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting clients and wake any session waiting to reply.
    ///
    /// Returns once the accept thread has exited. Sessions that are busy
    /// reading finish on their own. Calling `stop` again does nothing.
    pub fn stop(&mut self) {
        let Some(acceptor) = self.acceptor.take() else {
            return;
        };

        self.running.store(false, Ordering::SeqCst);
        self.stop.stop();
        acceptor.thread().unpark();
        if acceptor.join().is_err() {
            warn!("Accept thread panicked");
        }

        info!(addr = %self.local_addr, "SMTP server stopped");
    }

    /// The store this server commits messages to
    pub fn store(&self) -> &Arc<dyn MailStore> {
        &self.store
    }

    /// Number of messages currently in the store
    pub fn email_count(&self) -> Result<usize> {
        self.store.len()
    }

    /// Snapshot of every stored message
    pub fn messages(&self) -> Result<Vec<Arc<MailMessage>>> {
        self.store.messages()
    }

    pub fn message(&self, index: usize) -> Result<Arc<MailMessage>> {
        self.store.message(index)
    }

    pub fn clear_messages(&self) -> Result<()> {
        self.store.clear()
    }

    /// Wait until at least `count` messages are stored, polling once per
    /// millisecond for at most `ticks` polls.
    ///
    /// Returns the last count seen, which is below `count` if the wait ran
    /// out.
    pub fn anticipate_message_count_for(&self, count: usize, ticks: usize) -> Result<usize> {
        let mut current = self.email_count()?;
        for _ in 0..ticks {
            if current >= count {
                break;
            }
            thread::sleep(ANTICIPATE_TICK);
            current = self.email_count()?;
        }
        Ok(current)
    }
}

impl Drop for SmtpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: &TcpListener,
    mut pool: WorkerPool,
    context: &Arc<SessionContext>,
    running: &AtomicBool,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "Accepted connection");
                let context = Arc::clone(context);
                pool.execute(move || {
                    let span = info_span!("session", %peer);
                    let _enter = span.enter();
                    if let Err(e) = handle_client(stream, &context) {
                        warn!("Error handling client: {e}");
                    }
                });
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!("Tick");
                thread::park_timeout(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                warn!("Error accepting connection: {e}");
                thread::park_timeout(ACCEPT_POLL_INTERVAL);
            }
        }
    }

    pool.shutdown();
}

/// Run one session over an accepted connection
fn handle_client(stream: TcpStream, context: &SessionContext) -> Result<()> {
    // Accepted sockets may inherit non-blocking mode from the listener
    stream.set_nonblocking(false)?;
    if !context.read_timeout.is_zero() {
        stream.set_read_timeout(Some(context.read_timeout))?;
    }

    let reader = BufReader::new(stream.try_clone()?);
    let mut session = SmtpSession::new(Arc::clone(&context.store), &context.hostname)
        .with_response_delay(context.wait_in_response, context.stop.clone())
        .with_max_message_size(context.max_message_size);

    match session.run(reader, &stream) {
        // The client went away without QUIT; nothing to report
        Err(SmtpError::Io(e))
            if matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ) =>
        {
            debug!(state = ?session.state(), "Connection dropped: {e}");
            Ok(())
        }
        result => {
            debug!(state = ?session.state(), "Session finished");
            result
        }
    }
}
