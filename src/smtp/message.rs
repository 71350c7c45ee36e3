//! Mail message built up by a session and handed to a mail store

use std::fmt;

/// A message received by the SMTP server.
///
/// Headers are kept as an ordered multimap: names keep the order in which
/// they were first seen and each name keeps its values in arrival order.
/// Names are matched case-insensitively. The body is a single buffer of
/// lines joined with `\n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailMessage {
    headers: Vec<(String, Vec<String>)>,
    body: String,
    body_lines: usize,
    envelope_sender: Option<String>,
    envelope_recipients: Vec<String>,
}

impl MailMessage {
    /// Create an empty message
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value for a header, creating the header if it is new.
    ///
    /// Names are compared ignoring ASCII case. A value for `subject` after
    /// `Subject` joins the existing entry and is stored and written back
    /// under the first spelling, `Subject`.
    pub fn add_header(&mut self, name: &str, value: &str) {
        match self.header_entry_mut(name) {
            Some(values) => values.push(value.to_owned()),
            None => self
                .headers
                .push((name.to_owned(), vec![value.to_owned()])),
        }
    }

    /// Append text to the last value of a header.
    ///
    /// Used for folded header lines. Falls back to `add_header` when the
    /// header does not exist yet.
    pub fn append_header(&mut self, name: &str, value: &str) {
        match self
            .header_entry_mut(name)
            .and_then(|values| values.last_mut())
        {
            Some(last) => last.push_str(value),
            None => self.add_header(name, value),
        }
    }

    /// Append a line to the body
    pub fn append_body(&mut self, line: &str) {
        if self.body_lines > 0 {
            self.body.push('\n');
        }
        self.body.push_str(line);
        self.body_lines += 1;
    }

    /// Header names in the order they were first seen
    pub fn header_names(&self) -> impl Iterator<Item = &str> {
        self.headers.iter().map(|(name, _)| name.as_str())
    }

    /// All values of a header, empty if the header is absent
    pub fn header_values(&self, name: &str) -> &[String] {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }

    /// First value of a header (if present)
    pub fn first_header_value(&self, name: &str) -> Option<&str> {
        self.header_values(name).first().map(String::as_str)
    }

    /// Iterate over every `(name, value)` pair in storage order
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().flat_map(|(name, values)| {
            values
                .iter()
                .map(move |value| (name.as_str(), value.as_str()))
        })
    }

    /// Get the subject line (if present)
    pub fn subject(&self) -> Option<&str> {
        self.first_header_value("Subject")
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Sender address from the MAIL command
    pub fn envelope_sender(&self) -> Option<&str> {
        self.envelope_sender.as_deref()
    }

    /// Recipient addresses from the RCPT commands
    pub fn envelope_recipients(&self) -> &[String] {
        &self.envelope_recipients
    }

    pub fn set_envelope_sender(&mut self, sender: &str) {
        self.envelope_sender = Some(sender.to_owned());
    }

    pub fn add_envelope_recipient(&mut self, recipient: &str) {
        self.envelope_recipients.push(recipient.to_owned());
    }

    /// Check if this message was sent to a specific recipient
    pub fn has_recipient(&self, recipient: &str) -> bool {
        self.envelope_recipients
            .iter()
            .any(|addr| addr == recipient)
    }

    fn header_entry_mut(&mut self, name: &str) -> Option<&mut Vec<String>> {
        self.headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, values)| values)
    }
}

/// Whether a header line continues the previous header (RFC 5322 folding)
pub(crate) fn is_continuation_line(line: &str) -> bool {
    matches!(
        line.chars().next(),
        Some(' ' | '\t' | '\x0b' | '\x0c' | '\r' | '\n')
    )
}

impl fmt::Display for MailMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.headers() {
            writeln!(f, "{name}: {value}")?;
        }
        writeln!(f)?;
        writeln!(f, "{}", self.body)
    }
}
