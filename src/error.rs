//! Harness errors

use std::fmt;

use similar::{ChangeTag, TextDiff};

use crate::decoder::DecodeError;
use crate::pattern::ExpectationPattern;
use crate::queue::Mismatch;

/// The kind of harness error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The trace stream could not be decoded
    Decode,
    /// A record arrived that does not match the head expectation
    MatchMismatch,
    /// Expectations were still pending at the end of a test
    QueueNotDrained,
    /// No record arrived within the configured time
    Timeout,
    /// A command was issued out of turn, or the session is in the wrong state
    ProtocolViolation,
    /// Invalid script syntax
    Syntax,
    /// Invalid usage of a command
    Usage,
    /// IO error on the target connection
    Io,
    /// Skip the test
    Skip,
}

impl ErrorKind {
    /// Errors after which the session cannot be trusted at all.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::Decode | ErrorKind::ProtocolViolation | ErrorKind::Io)
    }
}

/// A harness error with script location context
#[derive(Debug)]
pub struct HarnessError {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub command: Option<String>,
    pub args: Vec<String>,
}

impl HarnessError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: None,
            line: None,
            command: None,
            args: Vec::new(),
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, line: usize) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    pub fn with_command(mut self, cmd: impl Into<String>) -> Self {
        self.command = Some(cmd.into());
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, msg)
    }

    pub fn usage(cmd: &str, expected: &str) -> Self {
        if expected.is_empty() {
            return Self::new(ErrorKind::Usage, format!("usage: {} (no arguments)", cmd));
        }
        Self::new(ErrorKind::Usage, format!("usage: {} {}", cmd, expected))
    }

    pub fn skip(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Skip, msg)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolViolation, msg)
    }

    /// A record that did not match the head expectation.
    pub fn mismatch(m: &Mismatch) -> Self {
        let expected = m.expected.to_string();
        let actual = m.actual.to_string();
        Self::new(
            ErrorKind::MatchMismatch,
            format!(
                "expected: {}\n  actual: {}\n    diff: {}",
                expected,
                actual,
                word_diff(&expected, &actual)
            ),
        )
    }

    /// A record arrived while nothing was expected.
    pub fn unexpected(actual: &impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::MatchMismatch,
            format!("expected: nothing\n  actual: {}", actual),
        )
    }

    pub fn timeout(expected: &ExpectationPattern, waited_ms: u128) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("expected: {}\n  actual: no record received within {}ms", expected, waited_ms),
        )
    }

    pub fn not_drained(unmet: &[ExpectationPattern]) -> Self {
        let list = unmet
            .iter()
            .map(|p| format!("\n  pending: {}", p))
            .collect::<String>();
        Self::new(
            ErrorKind::QueueNotDrained,
            format!("{} expectation(s) not met{}", unmet.len(), list),
        )
    }

    pub fn is_skip(&self) -> bool {
        self.kind == ErrorKind::Skip
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

/// Inline word diff: `[-removed-]` and `{+added+}`.
fn word_diff(expected: &str, actual: &str) -> String {
    let diff = TextDiff::from_words(expected, actual);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let value = change.value();
        match change.tag() {
            ChangeTag::Equal => out.push_str(value),
            ChangeTag::Delete => out.push_str(&format!("[-{}-]", value)),
            ChangeTag::Insert => out.push_str(&format!("{{+{}+}}", value)),
        }
    }
    out
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:", file)?;
        }
        if let Some(line) = self.line {
            write!(f, "{}:", line)?;
        }
        if let Some(ref cmd) = self.command {
            if self.args.is_empty() {
                write!(f, " {}: ", cmd)?;
            } else {
                let quoted = self
                    .args
                    .iter()
                    .map(|a| {
                        if a.contains(' ') || a.contains('\t') || a.is_empty() {
                            format!("'{}'", a)
                        } else {
                            a.clone()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                write!(f, " {} {}: ", cmd, quoted)?;
            }
        } else if self.file.is_some() || self.line.is_some() {
            write!(f, " ")?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HarnessError {}

impl From<std::io::Error> for HarnessError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}

impl From<DecodeError> for HarnessError {
    fn from(e: DecodeError) -> Self {
        Self::new(ErrorKind::Decode, e.to_string())
    }
}
