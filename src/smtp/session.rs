//! SMTP session state management

use std::io::{self, BufRead, ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::smtp::commands::SmtpCommand;
use crate::smtp::error::{Result, SmtpLimits};
use crate::smtp::message::{MailMessage, is_continuation_line};
use crate::smtp::response::SmtpResponse;
use crate::smtp::signal::StopSignal;
use crate::store::MailStore;

/// Represents the current state of an SMTP session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpState {
    /// Connection accepted, greeting not sent yet. Also the state after QUIT.
    Connect,
    /// Greeting sent - ready for HELO or MAIL
    Greet,
    /// MAIL FROM received - ready for RCPT
    Sender,
    /// At least one RCPT TO received - ready for DATA or more RCPT
    Recipient,
    /// DATA accepted - reading header lines
    DataHeaders,
    /// Blank line seen - reading body lines
    DataBody,
    /// Message complete - ready for a new transaction or QUIT
    Quit,
}

impl SmtpState {
    /// Whether lines in this state are message content rather than commands
    pub fn is_data(self) -> bool {
        matches!(self, Self::DataHeaders | Self::DataBody)
    }
}

/// Drives one client connection and commits each completed message to the
/// mail store.
pub struct SmtpSession {
    state: SmtpState,
    message: MailMessage,
    last_header: Option<String>,
    store: Arc<dyn MailStore>,
    hostname: String,
    wait_in_response: Duration,
    stop: StopSignal,
    max_message_size: usize,
    /// Bytes of message data received in the current DATA phase
    data_size: usize,
}

/// Outcome of reading one line from the client
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line,
    TooLong,
    Eof,
}

impl SmtpSession {
    /// Create a new SMTP session
    pub fn new(store: Arc<dyn MailStore>, hostname: &str) -> Self {
        Self {
            state: SmtpState::Connect,
            message: MailMessage::new(),
            last_header: None,
            store,
            hostname: hostname.to_owned(),
            wait_in_response: Duration::ZERO,
            stop: StopSignal::new(),
            max_message_size: SmtpLimits::MAX_DATA_SIZE,
            data_size: 0,
        }
    }

    /// Refuse messages whose data exceeds `bytes`, counting each line with
    /// its CRLF
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Delay every reply by `delay`. Raising `stop` cuts the delay short and
    /// ends the session.
    pub fn with_response_delay(mut self, delay: Duration, stop: StopSignal) -> Self {
        self.wait_in_response = delay;
        self.stop = stop;
        self
    }

    pub fn state(&self) -> SmtpState {
        self.state
    }

    /// The message currently being built
    pub fn message(&self) -> &MailMessage {
        &self.message
    }

    /// Run the session until the client quits or disconnects, the read
    /// times out, or the server stops.
    ///
    /// An overlong command line is answered with 500 and skipped. An
    /// overlong line inside message data, or data past the size limit,
    /// discards the message and ends the session.
    pub fn run<R: BufRead, W: Write>(&mut self, mut reader: R, mut writer: W) -> Result<()> {
        let greeting = self.apply(SmtpCommand::Connect);
        if !self.send(&mut writer, &greeting)? {
            return Ok(());
        }

        let mut line_buffer = Vec::new();
        while self.state != SmtpState::Connect {
            if self.stop.is_stopped() {
                debug!("Server stopping, ending session");
                break;
            }

            line_buffer.clear();
            let limit = if self.state.is_data() {
                SmtpLimits::TEXT_LINE_MAX_LENGTH
            } else {
                SmtpLimits::COMMAND_LINE_MAX_LENGTH
            };

            let response = match read_line(&mut reader, &mut line_buffer, limit) {
                Ok(LineRead::Line) => self.process_line(&decode_line(&line_buffer)),
                Ok(LineRead::TooLong) => self.reject_long_line(&mut reader, limit)?,
                Ok(LineRead::Eof) => {
                    debug!(state = ?self.state, "Connection closed by peer");
                    break;
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    debug!(state = ?self.state, "Read timed out");
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            if !self.send(&mut writer, &response)? {
                debug!("Server stopping, ending session");
                break;
            }
        }

        Ok(())
    }

    /// Answer a line that did not fit in `limit` bytes.
    ///
    /// Outside message data the rest of the line is skipped and the session
    /// goes on. Inside message data the message is dropped and the session
    /// ends without reading further.
    fn reject_long_line<R: BufRead>(
        &mut self,
        reader: &mut R,
        limit: usize,
    ) -> Result<SmtpResponse> {
        warn!(state = ?self.state, limit, "Line too long");

        if self.state.is_data() {
            self.discard_message();
            self.state = SmtpState::Connect;
            return Ok(SmtpResponse::line_too_long(SmtpState::Connect));
        }

        skip_line(reader)?;
        Ok(SmtpResponse::line_too_long(self.state))
    }

    /// Apply one line of client input and return the response to send.
    ///
    /// A completed message is committed to the store before the response
    /// is returned, so a client that has seen the final 250 can rely on the
    /// message being retrievable.
    pub fn process_line(&mut self, line: &str) -> SmtpResponse {
        trace!(state = ?self.state, line, "Received line");

        if self.state.is_data() {
            self.data_size += line.len() + 2;
            if self.data_size > self.max_message_size {
                warn!(
                    size = self.data_size,
                    limit = self.max_message_size,
                    "Message too large, closing connection"
                );
                self.discard_message();
                let response = SmtpResponse::too_much_data();
                self.state = response.next_state;
                return response;
            }
        }

        self.apply(SmtpCommand::parse(line, self.state))
    }

    fn apply(&mut self, command: SmtpCommand) -> SmtpResponse {
        let previous = self.state;
        let response = command.respond(previous, &self.hostname);
        self.state = response.next_state;

        self.store_input(&command);

        if self.state == SmtpState::Quit && previous != SmtpState::Quit {
            self.commit();
        }

        response
    }

    fn store_input(&mut self, command: &SmtpCommand) {
        match (command, self.state) {
            (SmtpCommand::Mail(Some(sender)), SmtpState::Sender) => {
                self.message.set_envelope_sender(sender);
            }
            (SmtpCommand::Rcpt(Some(recipient)), SmtpState::Recipient) => {
                self.message.add_envelope_recipient(recipient);
            }
            (SmtpCommand::HeaderLine(line), SmtpState::DataHeaders) => self.add_data_header(line),
            (SmtpCommand::BodyLine(line), SmtpState::DataBody) => self.message.append_body(line),
            (SmtpCommand::Rset, SmtpState::Greet) => self.discard_message(),
            _ => {}
        }
    }

    fn add_data_header(&mut self, line: &str) {
        let folded = is_continuation_line(line);

        match line.find(':') {
            Some(colon) if colon > 0 && !folded => {
                let name = line[..colon].trim();
                let value = line[colon + 1..].trim();
                self.message.add_header(name, value);
                self.last_header = Some(name.to_owned());
            }
            _ => match (&self.last_header, folded) {
                (Some(name), true) => self.message.append_header(name, line),
                _ => warn!(line, "Dropping malformed header line"),
            },
        }
    }

    fn discard_message(&mut self) {
        self.message = MailMessage::new();
        self.last_header = None;
        self.data_size = 0;
    }

    fn commit(&mut self) {
        let message = std::mem::take(&mut self.message);
        self.last_header = None;
        self.data_size = 0;

        info!(
            subject = message.subject().unwrap_or_default(),
            recipients = message.envelope_recipients().len(),
            "Received message"
        );

        if let Err(e) = self.store.add(message) {
            error!("Failed to store message: {e}");
        }
    }

    /// Write the reply (if any) after the configured delay.
    ///
    /// Returns `false` when the server stopped during the delay.
    fn send<W: Write>(&self, writer: &mut W, response: &SmtpResponse) -> Result<bool> {
        let Some(reply) = &response.reply else {
            return Ok(true);
        };

        if !self.wait_in_response.is_zero() && self.stop.wait_timeout(self.wait_in_response) {
            return Ok(false);
        }

        writer.write_all(reply.format().as_bytes())?;
        writer.flush()?;
        Ok(true)
    }
}

/// Read one line of at most `limit` bytes into `buffer`.
///
/// A final line without a newline before EOF still counts as a line.
fn read_line<R: BufRead>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
    limit: usize,
) -> io::Result<LineRead> {
    let read = reader.by_ref().take(limit as u64).read_until(b'\n', buffer)?;
    if read == 0 {
        Ok(LineRead::Eof)
    } else if read == limit && !buffer.ends_with(b"\n") {
        Ok(LineRead::TooLong)
    } else {
        Ok(LineRead::Line)
    }
}

/// Consume input up to and including the next newline
fn skip_line<R: BufRead>(reader: &mut R) -> io::Result<()> {
    loop {
        let (consumed, done) = {
            let available = reader.fill_buf()?;
            match available.iter().position(|&b| b == b'\n') {
                Some(newline) => (newline + 1, true),
                None => (available.len(), available.is_empty()),
            }
        };
        reader.consume(consumed);
        if done {
            return Ok(());
        }
    }
}

/// Decode a raw line, replacing invalid UTF-8 and dropping the line ending
fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}
