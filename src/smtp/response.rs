//! SMTP response handling

use crate::smtp::session::SmtpState;

/// A reply line that can be sent to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpReply {
    /// The SMTP reply code (e.g. 250, 354, 503)
    pub code: u16,
    /// The human-readable message
    pub message: String,
}

impl SmtpReply {
    pub fn new(code: u16, message: &str) -> Self {
        Self {
            code,
            message: message.to_owned(),
        }
    }

    /// Format the reply for sending over the wire
    pub fn format(&self) -> String {
        format!("{} {}\r\n", self.code, self.message)
    }
}

/// Outcome of applying one command to a session state.
///
/// Data lines produce no reply; everything else produces exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    pub reply: Option<SmtpReply>,
    pub next_state: SmtpState,
}

impl SmtpResponse {
    fn reply(code: u16, message: &str, next_state: SmtpState) -> Self {
        Self {
            reply: Some(SmtpReply::new(code, message)),
            next_state,
        }
    }

    /// A response that writes nothing back and only moves the state
    pub fn silent(next_state: SmtpState) -> Self {
        Self {
            reply: None,
            next_state,
        }
    }

    /// Create a greeting response (220)
    pub fn greeting(hostname: &str) -> Self {
        Self::reply(
            220,
            &format!("{hostname} SMTP service ready"),
            SmtpState::Greet,
        )
    }

    /// Create a HELO/EHLO response (250)
    pub fn helo(hostname: &str, client_domain: &str) -> Self {
        Self::reply(
            250,
            &format!("{hostname} Hello {client_domain}"),
            SmtpState::Greet,
        )
    }

    /// Create a success response (250 OK)
    pub fn ok(next_state: SmtpState) -> Self {
        Self::reply(250, "OK", next_state)
    }

    /// Create a DATA intermediate response (354)
    pub fn data_start() -> Self {
        Self::reply(
            354,
            "Start mail input; end with <CRLF>.<CRLF>",
            SmtpState::DataHeaders,
        )
    }

    /// Create a QUIT response (221)
    pub fn quit(hostname: &str) -> Self {
        Self::reply(
            221,
            &format!("{hostname} service closing transmission channel"),
            SmtpState::Connect,
        )
    }

    pub fn help(state: SmtpState) -> Self {
        Self::reply(211, "No help available", state)
    }

    pub fn not_supported(state: SmtpState) -> Self {
        Self::reply(252, "Not supported", state)
    }

    pub fn unrecognized(state: SmtpState) -> Self {
        Self::reply(500, "Command not recognized", state)
    }

    pub fn syntax_error(state: SmtpState) -> Self {
        Self::reply(501, "Syntax error in parameters", state)
    }

    /// Create a "bad sequence of commands" response (503), keeping the state
    pub fn bad_sequence(verb: &str, state: SmtpState) -> Self {
        Self::reply(503, &format!("Bad sequence of commands: {verb}"), state)
    }

    /// Line longer than the protocol allows (500)
    pub fn line_too_long(next_state: SmtpState) -> Self {
        Self::reply(500, "Line too long", next_state)
    }

    /// Message data over the size limit (552). The connection is closed.
    pub fn too_much_data() -> Self {
        Self::reply(552, "Too much mail data", SmtpState::Connect)
    }

    pub fn code(&self) -> Option<u16> {
        self.reply.as_ref().map(|reply| reply.code)
    }
}
