//! Mail store that keeps one `.eml` file per message

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::smtp::error::{Result, SmtpError};
use crate::smtp::message::{MailMessage, is_continuation_line};
use crate::store::MailStore;

/// Characters that may not appear in a message filename
const UNSAFE_FILENAME_CHARS: [char; 8] = ['\\', '/', '<', '>', '?', '*', '"', '|'];

/// Subjects are cut to this many bytes so filenames stay within OS limits
const MAX_SUBJECT_BYTES: usize = 200;

/// Store that writes each message to its own `.eml` file.
///
/// Files are named `<sequence>_<subject>.eml`. On first use the store loads
/// every such file already in its directory and continues the sequence from
/// the number of files found. The in-memory list reflects insertion order;
/// recovered messages come first, in whatever order the filesystem lists
/// them.
///
/// If writing a file fails the message stays in the in-memory list and the
/// error is returned to the caller. Nothing is rolled back.
#[derive(Debug)]
pub struct EmlMailStore {
    directory: PathBuf,
    state: Mutex<EmlState>,
}

#[derive(Debug, Default)]
struct EmlState {
    initialized: bool,
    sequence: usize,
    messages: Vec<Arc<MailMessage>>,
}

impl EmlMailStore {
    pub const DEFAULT_DIRECTORY: &'static str = "eml_store";

    /// Create a store backed by `directory`. Nothing touches the disk until
    /// the store is first used.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            state: Mutex::new(EmlState::default()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Filename used for `message` at position `sequence`
    pub fn filename(message: &MailMessage, sequence: usize) -> String {
        let subject = truncate(message.subject().unwrap_or_default(), MAX_SUBJECT_BYTES);
        sanitize_filename(&format!("{sequence}_{subject}.eml"))
    }

    /// Lock the state, loading the directory the first time through
    fn lock(&self) -> Result<MutexGuard<'_, EmlState>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.initialized {
            self.load(&mut state)?;
            state.initialized = true;
        }
        Ok(state)
    }

    fn load(&self, state: &mut EmlState) -> Result<()> {
        let init_error = |source| SmtpError::StoreInit {
            path: self.directory.clone(),
            source,
        };

        if !self.directory.exists() {
            info!(path = %self.directory.display(), "Creating mail store directory");
            return fs::create_dir_all(&self.directory).map_err(init_error);
        }

        let files = self.message_files().map_err(init_error)?;
        for path in &files {
            match fs::read_to_string(path) {
                Ok(text) => state.messages.push(Arc::new(parse_eml(&text))),
                Err(e) => warn!(path = %path.display(), "Skipping unreadable message file: {e}"),
            }
        }
        state.sequence = files.len();

        info!(
            path = %self.directory.display(),
            count = state.messages.len(),
            "Loaded stored messages"
        );
        Ok(())
    }

    /// Files in the store directory that follow the store's naming scheme
    fn message_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let is_message = entry.file_name().to_str().is_some_and(is_eml_filename);
            if is_message && entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}

impl MailStore for EmlMailStore {
    fn add(&self, message: MailMessage) -> Result<()> {
        let mut state = self.lock()?;
        state.sequence += 1;

        let path = self.directory.join(Self::filename(&message, state.sequence));
        let message = Arc::new(message);
        state.messages.push(Arc::clone(&message));

        info!(count = state.sequence, path = %path.display(), "Storing message");

        write_message_file(&self.directory, &path, &message)
            .map_err(|source| SmtpError::StoreWrite { path, source })
    }

    fn messages(&self) -> Result<Vec<Arc<MailMessage>>> {
        Ok(self.lock()?.messages.clone())
    }

    fn message(&self, index: usize) -> Result<Arc<MailMessage>> {
        let state = self.lock()?;
        state
            .messages
            .get(index)
            .cloned()
            .ok_or(SmtpError::IndexOutOfRange {
                index,
                len: state.messages.len(),
            })
    }

    fn len(&self) -> Result<usize> {
        Ok(self.lock()?.messages.len())
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.lock()?;

        match self.message_files() {
            Ok(files) => {
                for path in files {
                    match fs::remove_file(&path) {
                        Ok(()) => debug!(path = %path.display(), "Deleted message file"),
                        Err(e) => {
                            warn!(path = %path.display(), "Could not delete message file: {e}");
                        }
                    }
                }
            }
            Err(e) => warn!(path = %self.directory.display(), "Could not list mail store: {e}"),
        }

        state.messages.clear();
        state.sequence = 0;
        Ok(())
    }
}

fn write_message_file(directory: &Path, path: &Path, message: &MailMessage) -> io::Result<()> {
    // The directory may have been removed behind our back
    if !directory.exists() {
        fs::create_dir_all(directory)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    write_eml(&mut writer, message)?;
    writer.flush()
}

/// Serialize a message: one `name: value` line per header value, a blank
/// line, then the body.
pub(crate) fn write_eml<W: Write>(writer: &mut W, message: &MailMessage) -> io::Result<()> {
    for (name, value) in message.headers() {
        writeln!(writer, "{name}: {value}")?;
    }
    writeln!(writer)?;
    writeln!(writer, "{}", message.body())
}

/// Parse the text of a stored message back into a [`MailMessage`].
///
/// Header lines run up to the first empty line; lines starting with
/// whitespace continue the previous header. Everything after the empty
/// line is the body, minus the final newline.
///
/// Files written by [`write_eml`] use `\n` line endings and are read as is,
/// so a `\r` inside a value survives. A file where every line ends in
/// `\r\n` is taken to be CRLF-formatted and its line endings are
/// normalized; a message whose every line really ended in `\r` would lose
/// that `\r` here.
pub(crate) fn parse_eml(text: &str) -> MailMessage {
    let line_feeds = text.matches('\n').count();
    let text = if line_feeds > 0 && text.matches("\r\n").count() == line_feeds {
        text.replace("\r\n", "\n")
    } else {
        text.to_owned()
    };
    let (headers, body) = match text.strip_prefix('\n') {
        Some(body) => ("", body),
        None => text.split_once("\n\n").unwrap_or((text.as_str(), "")),
    };

    let mut message = MailMessage::new();
    let mut last_header: Option<String> = None;

    for line in headers.lines() {
        if is_continuation_line(line) {
            if let Some(name) = &last_header {
                message.append_header(name, line);
            }
        } else if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            message.add_header(name, value.trim());
            last_header = Some(name.to_owned());
        }
    }

    let body = body.strip_suffix('\n').unwrap_or(body);
    if !body.is_empty() {
        for line in body.split('\n') {
            message.append_body(line);
        }
    }

    message
}

/// Replace characters that are unsafe in filenames with `_`
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if UNSAFE_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Whether `name` follows the `<digits>_<anything>.eml` naming scheme
pub fn is_eml_filename(name: &str) -> bool {
    match name.split_once('_') {
        Some((sequence, rest)) => {
            !sequence.is_empty()
                && sequence.bytes().all(|b| b.is_ascii_digit())
                && rest.ends_with(".eml")
        }
        None => false,
    }
}

fn truncate(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const SAMPLE: &str = "From: \"Bob Example\" <bob@example.org>\n\
                          To: \"Alice Example\" <alice@example.com>\n\
                          Cc: theboss@example.com\n\
                          Date: Tue, 15 January 2008 16:02:43 -0500\n\
                          Subject: Test message\n\
                          \n\
                          Hello Alice.\n\
                          This is a test message with 5 header fields and 4 lines in the message body.\n\
                          Your friend,\n\
                          Bob\n";

    fn message_with_subject(subject: &str, body: &str) -> MailMessage {
        let mut message = MailMessage::new();
        message.add_header("Subject", subject);
        message.append_body(body);
        message
    }

    fn file_names(dir: &Path) -> HashSet<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect()
    }

    #[test]
    fn test_parse_headers() {
        let message = parse_eml(SAMPLE);
        assert_eq!(
            message.header_values("From"),
            ["\"Bob Example\" <bob@example.org>"]
        );
        assert_eq!(message.header_values("To").len(), 1);
        assert_eq!(message.header_names().count(), 5);
        assert!(message.first_header_value("MissingHeader").is_none());
    }

    #[test]
    fn test_parse_body() {
        let message = parse_eml(SAMPLE);
        assert_eq!(
            message.body(),
            "Hello Alice.\n\
             This is a test message with 5 header fields and 4 lines in the message body.\n\
             Your friend,\n\
             Bob"
        );
    }

    #[test]
    fn test_parse_folded_and_crlf() {
        let message = parse_eml("Subject: Hello\r\n World\r\n\r\nbody\r\n");
        assert_eq!(message.subject(), Some("Hello World"));
        assert_eq!(message.body(), "body");
    }

    #[test]
    fn test_carriage_returns_inside_values_survive() {
        let mut message = MailMessage::new();
        message.add_header("Subject", "odd\rvalue");
        message.append_body("ends in cr\r");
        message.append_body("plain");

        let mut out = Vec::new();
        write_eml(&mut out, &message).unwrap();
        let parsed = parse_eml(&String::from_utf8(out).unwrap());

        assert_eq!(parsed.subject(), Some("odd\rvalue"));
        assert_eq!(parsed.body(), "ends in cr\r\nplain");
    }

    #[test]
    fn test_parse_without_headers() {
        let message = parse_eml("\nonly body\n");
        assert_eq!(message.header_names().count(), 0);
        assert_eq!(message.body(), "only body");
    }

    #[test]
    fn test_write_eml() {
        let mut message = MailMessage::new();
        message.add_header("Received", "one");
        message.add_header("Subject", "Hi");
        message.add_header("Received", "two");
        message.append_body("line 1");
        message.append_body("line 2");

        let mut out = Vec::new();
        write_eml(&mut out, &message).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Received: one\nReceived: two\nSubject: Hi\n\nline 1\nline 2\n"
        );
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("1_A/B.eml"), "1_A_B.eml");
        assert_eq!(
            sanitize_filename(r#"a\b/c<d>e?f*g"h|i"#),
            "a_b_c_d_e_f_g_h_i"
        );
        assert_eq!(sanitize_filename("plain: text"), "plain: text");
    }

    #[test]
    fn test_is_eml_filename() {
        assert!(is_eml_filename("1_.eml"));
        assert!(is_eml_filename("42_Some subject.eml"));
        assert!(!is_eml_filename("notes.txt"));
        assert!(!is_eml_filename("_subject.eml"));
        assert!(!is_eml_filename("x1_subject.eml"));
        assert!(!is_eml_filename("1_subject.eml.bak"));
    }

    #[test]
    fn test_filename_truncates_long_subjects() {
        let message = message_with_subject(&"é".repeat(300), "");
        let name = EmlMailStore::filename(&message, 7);
        assert!(name.starts_with("7_"));
        assert!(name.ends_with(".eml"));
        assert!(name.len() <= MAX_SUBJECT_BYTES + "7_.eml".len());
    }

    #[test]
    fn test_missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store");
        let store = EmlMailStore::new(&path);

        assert!(!path.exists());
        assert_eq!(store.len().unwrap(), 0);
        assert!(path.is_dir());
    }

    #[test]
    fn test_add_writes_sanitized_file_and_recovers() {
        let dir = tempfile::tempdir().unwrap();

        let store = EmlMailStore::new(dir.path());
        store.add(message_with_subject("A/B", "Hello")).unwrap();
        assert_eq!(file_names(dir.path()), HashSet::from(["1_A_B.eml".to_owned()]));

        let recovered = EmlMailStore::new(dir.path());
        assert_eq!(recovered.len().unwrap(), 1);
        let message = recovered.message(0).unwrap();
        assert_eq!(message.subject(), Some("A/B"));
        assert_eq!(message.body(), "Hello");
    }

    #[test]
    fn test_sequence_continues_after_recovery() {
        let dir = tempfile::tempdir().unwrap();

        let store = EmlMailStore::new(dir.path());
        store.add(message_with_subject("one", "")).unwrap();
        store.add(message_with_subject("two", "")).unwrap();

        let recovered = EmlMailStore::new(dir.path());
        recovered.add(message_with_subject("three", "")).unwrap();

        assert_eq!(recovered.len().unwrap(), 3);
        assert_eq!(
            file_names(dir.path()),
            HashSet::from([
                "1_one.eml".to_owned(),
                "2_two.eml".to_owned(),
                "3_three.eml".to_owned()
            ])
        );
        assert_eq!(recovered.message(2).unwrap().subject(), Some("three"));
    }

    #[test]
    fn test_foreign_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README.txt"), "not a message").unwrap();
        fs::write(dir.path().join("5_kept.eml"), SAMPLE).unwrap();

        let store = EmlMailStore::new(dir.path());
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.message(0).unwrap().subject(), Some("Test message"));

        store.clear().unwrap();
        assert_eq!(file_names(dir.path()), HashSet::from(["README.txt".to_owned()]));
    }

    #[test]
    fn test_clear_removes_files_and_resets_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmlMailStore::new(dir.path());
        store.add(message_with_subject("first", "")).unwrap();
        store.add(message_with_subject("second", "")).unwrap();

        store.clear().unwrap();
        assert_eq!(store.len().unwrap(), 0);
        assert!(store.messages().unwrap().is_empty());
        assert!(file_names(dir.path()).is_empty());

        store.add(message_with_subject("again", "")).unwrap();
        assert_eq!(file_names(dir.path()), HashSet::from(["1_again.eml".to_owned()]));
    }

    #[test]
    fn test_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmlMailStore::new(dir.path());
        store.add(message_with_subject("only", "")).unwrap();

        assert!(matches!(
            store.message(1),
            Err(SmtpError::IndexOutOfRange { index: 1, len: 1 })
        ));
    }

    #[test]
    fn test_write_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmlMailStore::new(dir.path());

        // A directory squatting on the target name makes File::create fail
        fs::create_dir(dir.path().join("1_blocked.eml")).unwrap();
        let result = store.add(message_with_subject("blocked", ""));

        assert!(matches!(result, Err(SmtpError::StoreWrite { .. })));
        // The in-memory list is not rolled back
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_init_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-directory");
        fs::write(&file, "").unwrap();

        let store = EmlMailStore::new(file.join("store"));
        assert!(matches!(store.len(), Err(SmtpError::StoreInit { .. })));
    }
}
