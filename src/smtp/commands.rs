//! Parsing of input lines into SMTP commands and the state transitions they drive

use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpState;

/// One line of client input, interpreted for the state it arrived in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Synthetic command that produces the greeting on a new connection
    Connect,
    Helo(String),
    /// `MAIL FROM:<path>`; `None` when the `FROM:` parameter is missing
    Mail(Option<String>),
    /// `RCPT TO:<path>`; `None` when the `TO:` parameter is missing
    Rcpt(Option<String>),
    Data,
    Rset,
    Noop,
    Vrfy,
    Expn,
    List,
    Help,
    Quit,
    /// A line received while reading message headers
    HeaderLine(String),
    /// The empty line separating headers from the body
    BlankLine,
    /// A line received while reading the message body
    BodyLine(String),
    /// The lone `.` that ends the message data
    DataEnd,
    Unrecognized(String),
}

impl SmtpCommand {
    /// Interpret a line received in `state`.
    ///
    /// In the data states every line is message content, so verbs are only
    /// recognised outside of them.
    pub fn parse(line: &str, state: SmtpState) -> Self {
        if state.is_data() {
            return Self::parse_data_line(line, state);
        }

        let (verb, rest) = match line.trim().split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line.trim(), ""),
        };

        match verb.to_uppercase().as_str() {
            "HELO" | "EHLO" => Self::Helo(rest.to_owned()),
            "MAIL" => Self::Mail(parse_path(rest, "FROM:")),
            "RCPT" => Self::Rcpt(parse_path(rest, "TO:")),
            "DATA" => Self::Data,
            "RSET" => Self::Rset,
            "NOOP" => Self::Noop,
            "VRFY" => Self::Vrfy,
            "EXPN" => Self::Expn,
            "LIST" => Self::List,
            "HELP" => Self::Help,
            "QUIT" => Self::Quit,
            _ => Self::Unrecognized(verb.to_owned()),
        }
    }

    fn parse_data_line(line: &str, state: SmtpState) -> Self {
        if line == "." {
            return Self::DataEnd;
        }

        // Transparency: a leading dot was doubled by the client
        let line = line.strip_prefix('.').filter(|l| l.starts_with('.')).unwrap_or(line);

        match state {
            SmtpState::DataHeaders if line.is_empty() => Self::BlankLine,
            SmtpState::DataHeaders => Self::HeaderLine(line.to_owned()),
            _ => Self::BodyLine(line.to_owned()),
        }
    }

    /// Command name used in replies and logs
    pub fn verb(&self) -> &str {
        match self {
            Self::Connect => "Connect",
            Self::Helo(_) => "HELO",
            Self::Mail(_) => "MAIL",
            Self::Rcpt(_) => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Noop => "NOOP",
            Self::Vrfy => "VRFY",
            Self::Expn => "EXPN",
            Self::List => "LIST",
            Self::Help => "HELP",
            Self::Quit => "QUIT",
            Self::HeaderLine(_) => "header line",
            Self::BlankLine => "blank line",
            Self::BodyLine(_) => "body line",
            Self::DataEnd => ".",
            Self::Unrecognized(verb) => verb,
        }
    }

    /// Compute the response and next state for this command in `state`.
    ///
    /// A command that is not valid in `state` yields 503 and leaves the
    /// state unchanged.
    pub fn respond(&self, state: SmtpState, hostname: &str) -> SmtpResponse {
        use SmtpState::*;

        match (self, state) {
            (Self::Connect, Connect) => SmtpResponse::greeting(hostname),

            (Self::Helo(domain), Greet | Quit) => SmtpResponse::helo(hostname, domain),

            (Self::Mail(None), Greet | Quit) | (Self::Rcpt(None), Sender | Recipient) => {
                SmtpResponse::syntax_error(state)
            }
            (Self::Mail(Some(_)), Greet | Quit) => SmtpResponse::ok(Sender),
            (Self::Rcpt(Some(_)), Sender | Recipient) => SmtpResponse::ok(Recipient),
            (Self::Data, Recipient) => SmtpResponse::data_start(),

            (Self::HeaderLine(_), DataHeaders) => SmtpResponse::silent(DataHeaders),
            (Self::BlankLine, DataHeaders) => SmtpResponse::silent(DataBody),
            (Self::BodyLine(_), DataBody) => SmtpResponse::silent(DataBody),
            (Self::DataEnd, DataHeaders | DataBody) => SmtpResponse::ok(Quit),

            (Self::Quit, Quit) => SmtpResponse::quit(hostname),

            (_, Connect | DataHeaders | DataBody) => SmtpResponse::bad_sequence(self.verb(), state),

            (Self::Rset, _) => SmtpResponse::ok(Greet),
            (Self::Noop, _) => SmtpResponse::ok(state),
            (Self::Vrfy | Self::Expn | Self::List, _) => SmtpResponse::not_supported(state),
            (Self::Help, _) => SmtpResponse::help(state),
            (Self::Unrecognized(_), _) => SmtpResponse::unrecognized(state),

            _ => SmtpResponse::bad_sequence(self.verb(), state),
        }
    }
}

/// Extract the address from `FROM:<path>` / `TO:<path>` parameters.
///
/// Anything after the closing bracket (ESMTP parameters) is ignored. The
/// null path `<>` yields an empty address.
fn parse_path(params: &str, keyword: &str) -> Option<String> {
    let head = params.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }

    let path = params[keyword.len()..].trim_start();
    let address = match path.strip_prefix('<') {
        Some(inner) => inner.split('>').next().unwrap_or_default(),
        None => path.split_whitespace().next().unwrap_or_default(),
    };

    Some(address.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use SmtpState::*;

    const HOST: &str = "test.local";

    #[test]
    fn test_parse_commands_case_insensitive() {
        assert_eq!(
            SmtpCommand::parse("helo client.local", Greet),
            SmtpCommand::Helo("client.local".to_owned())
        );
        assert_eq!(
            SmtpCommand::parse("EHLO client.local", Greet),
            SmtpCommand::Helo("client.local".to_owned())
        );
        assert_eq!(SmtpCommand::parse("data", Recipient), SmtpCommand::Data);
        assert_eq!(SmtpCommand::parse("Quit", Quit), SmtpCommand::Quit);
        assert_eq!(
            SmtpCommand::parse("BOGUS stuff", Greet),
            SmtpCommand::Unrecognized("BOGUS".to_owned())
        );
    }

    #[test]
    fn test_parse_mail_paths() {
        assert_eq!(
            SmtpCommand::parse("MAIL FROM:<sender@example.com>", Greet),
            SmtpCommand::Mail(Some("sender@example.com".to_owned()))
        );
        assert_eq!(
            SmtpCommand::parse("mail from: <sender@example.com> SIZE=1024", Greet),
            SmtpCommand::Mail(Some("sender@example.com".to_owned()))
        );
        assert_eq!(
            SmtpCommand::parse("MAIL FROM:<>", Greet),
            SmtpCommand::Mail(Some(String::new()))
        );
        assert_eq!(
            SmtpCommand::parse("RCPT TO:bare@example.com", Sender),
            SmtpCommand::Rcpt(Some("bare@example.com".to_owned()))
        );
        assert_eq!(
            SmtpCommand::parse("MAIL sender@example.com", Greet),
            SmtpCommand::Mail(None)
        );
        assert_eq!(SmtpCommand::parse("RCPT", Sender), SmtpCommand::Rcpt(None));
    }

    #[test]
    fn test_parse_data_lines() {
        assert_eq!(
            SmtpCommand::parse("Subject: Hi", DataHeaders),
            SmtpCommand::HeaderLine("Subject: Hi".to_owned())
        );
        assert_eq!(SmtpCommand::parse("", DataHeaders), SmtpCommand::BlankLine);
        assert_eq!(
            SmtpCommand::parse("", DataBody),
            SmtpCommand::BodyLine(String::new())
        );
        assert_eq!(SmtpCommand::parse(".", DataHeaders), SmtpCommand::DataEnd);
        assert_eq!(SmtpCommand::parse(".", DataBody), SmtpCommand::DataEnd);
        // Verbs are plain content while reading data
        assert_eq!(
            SmtpCommand::parse("QUIT", DataBody),
            SmtpCommand::BodyLine("QUIT".to_owned())
        );
    }

    #[test]
    fn test_parse_dot_stuffed_lines() {
        assert_eq!(
            SmtpCommand::parse("..", DataBody),
            SmtpCommand::BodyLine(".".to_owned())
        );
        assert_eq!(
            SmtpCommand::parse("..leading dot", DataBody),
            SmtpCommand::BodyLine(".leading dot".to_owned())
        );
        assert_eq!(
            SmtpCommand::parse(".single", DataBody),
            SmtpCommand::BodyLine(".single".to_owned())
        );
    }

    #[test]
    fn test_greeting_from_connect() {
        let response = SmtpCommand::Connect.respond(Connect, HOST);
        assert_eq!(response.code(), Some(220));
        assert_eq!(response.next_state, Greet);
    }

    #[test]
    fn test_connect_only_valid_once() {
        let response = SmtpCommand::Connect.respond(Greet, HOST);
        assert_eq!(response.code(), Some(503));
        assert_eq!(response.next_state, Greet);
    }

    #[test]
    fn test_full_transaction_transitions() {
        let steps = [
            (SmtpCommand::Helo("client".to_owned()), Greet, Some(250), Greet),
            (SmtpCommand::Mail(Some("a@b.c".to_owned())), Greet, Some(250), Sender),
            (SmtpCommand::Rcpt(Some("d@e.f".to_owned())), Sender, Some(250), Recipient),
            (SmtpCommand::Rcpt(Some("g@h.i".to_owned())), Recipient, Some(250), Recipient),
            (SmtpCommand::Data, Recipient, Some(354), DataHeaders),
            (SmtpCommand::HeaderLine("Subject: x".to_owned()), DataHeaders, None, DataHeaders),
            (SmtpCommand::BlankLine, DataHeaders, None, DataBody),
            (SmtpCommand::BodyLine("body".to_owned()), DataBody, None, DataBody),
            (SmtpCommand::DataEnd, DataBody, Some(250), Quit),
            (SmtpCommand::Mail(Some("a@b.c".to_owned())), Quit, Some(250), Sender),
        ];

        for (command, state, code, next_state) in steps {
            let response = command.respond(state, HOST);
            assert_eq!(response.code(), code, "{command:?} in {state:?}");
            assert_eq!(response.next_state, next_state, "{command:?} in {state:?}");
        }
    }

    #[test]
    fn test_quit_only_after_transaction() {
        let response = SmtpCommand::Quit.respond(Greet, HOST);
        assert_eq!(response.code(), Some(503));
        assert_eq!(response.next_state, Greet);

        let response = SmtpCommand::Quit.respond(Quit, HOST);
        assert_eq!(response.code(), Some(221));
        assert_eq!(response.next_state, Connect);
    }

    #[test]
    fn test_out_of_sequence_commands() {
        let cases = [
            (SmtpCommand::Rcpt(Some("a@b.c".to_owned())), Greet),
            (SmtpCommand::Data, Greet),
            (SmtpCommand::Data, Sender),
            (SmtpCommand::Mail(Some("a@b.c".to_owned())), Sender),
            (SmtpCommand::Mail(Some("a@b.c".to_owned())), Recipient),
            (SmtpCommand::Helo("client".to_owned()), Recipient),
            (SmtpCommand::DataEnd, Greet),
        ];

        for (command, state) in cases {
            let response = command.respond(state, HOST);
            assert_eq!(response.code(), Some(503), "{command:?} in {state:?}");
            assert_eq!(response.next_state, state);
        }
    }

    #[test]
    fn test_missing_parameters() {
        let response = SmtpCommand::Mail(None).respond(Greet, HOST);
        assert_eq!(response.code(), Some(501));
        assert_eq!(response.next_state, Greet);

        let response = SmtpCommand::Rcpt(None).respond(Recipient, HOST);
        assert_eq!(response.code(), Some(501));
        assert_eq!(response.next_state, Recipient);
    }

    #[test]
    fn test_auxiliary_commands() {
        let response = SmtpCommand::Rset.respond(Recipient, HOST);
        assert_eq!((response.code(), response.next_state), (Some(250), Greet));

        let response = SmtpCommand::Noop.respond(Sender, HOST);
        assert_eq!((response.code(), response.next_state), (Some(250), Sender));

        let response = SmtpCommand::Vrfy.respond(Greet, HOST);
        assert_eq!((response.code(), response.next_state), (Some(252), Greet));

        let response = SmtpCommand::Help.respond(Quit, HOST);
        assert_eq!((response.code(), response.next_state), (Some(211), Quit));

        let response = SmtpCommand::Unrecognized("XYZZY".to_owned()).respond(Greet, HOST);
        assert_eq!((response.code(), response.next_state), (Some(500), Greet));
    }
}
