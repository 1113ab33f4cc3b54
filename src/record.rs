//! Decoded trace records
//!
//! A [`TraceRecord`] is one structured unit of target output: the record
//! number used for filtering, an optional timestamp, and the ordered text
//! fields whose first entry is the record kind token.

use std::fmt;

/// Record numbers the harness gives meaning to. Everything else is opaque.
pub mod rec {
    pub const EMPTY: u8 = 0;
    pub const TEST_PAUSED: u8 = 58;
    pub const TEST_PROBE_GET: u8 = 59;
    pub const SIG_DICT: u8 = 60;
    pub const OBJ_DICT: u8 = 61;
    pub const FUN_DICT: u8 = 62;
    pub const USR_DICT: u8 = 63;
    pub const TARGET_INFO: u8 = 64;
    pub const TARGET_DONE: u8 = 65;
    pub const RX_STATUS: u8 = 66;
    pub const QUERY_DATA: u8 = 67;
    pub const PEEK_DATA: u8 = 68;
    pub const ASSERT_FAIL: u8 = 69;
    pub const QF_RUN: u8 = 70;
    pub const USER: u8 = 100;

    /// First record number the target never produces (0x7D..0x7F collide
    /// with the framing bytes once masked into the filter).
    pub const LIMIT: u8 = 125;

    /// Whether a record number can legitimately appear on the wire.
    pub fn is_known(rec: u8) -> bool {
        rec <= QF_RUN || (USER..LIMIT).contains(&rec)
    }
}

/// Kind tokens of the control records the protocol defines.
pub mod kind {
    pub const ACK: &str = "Trg-Ack";
    pub const DONE: &str = "Trg-Done";
    pub const ERROR: &str = "Trg-ERR";
    pub const PAUSED: &str = "TstPause";
    pub const INFO: &str = "Trg-Info";
    pub const RUN: &str = "QF_RUN";
}

/// One token of a record, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Timestamp(u32),
    Field(&'a str),
}

impl Token<'_> {
    pub fn is_timestamp(&self) -> bool {
        matches!(self, Token::Timestamp(_))
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Timestamp(ts) => write!(f, "{:010}", ts),
            Token::Field(s) => f.write_str(s),
        }
    }
}

/// A decoded trace record. Immutable once produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    /// Frame sequence number
    pub seq: u8,
    /// Record number
    pub rec: u8,
    /// Optional target timestamp
    pub timestamp: Option<u32>,
    /// Text fields; never empty, `fields[0]` is the kind token
    pub fields: Vec<String>,
}

impl TraceRecord {
    /// Build a record from its parts. The text is split on ASCII whitespace.
    pub fn new(seq: u8, rec: u8, timestamp: Option<u32>, text: &str) -> Self {
        Self {
            seq,
            rec,
            timestamp,
            fields: text.split_ascii_whitespace().map(str::to_string).collect(),
        }
    }

    /// The record kind token.
    pub fn kind(&self) -> &str {
        self.fields.first().map(String::as_str).unwrap_or("")
    }

    /// All tokens: the timestamp (if any) followed by the fields.
    pub fn tokens(&self) -> Vec<Token<'_>> {
        let mut tokens = Vec::with_capacity(self.fields.len() + 1);
        if let Some(ts) = self.timestamp {
            tokens.push(Token::Timestamp(ts));
        }
        tokens.extend(self.fields.iter().map(|f| Token::Field(f)));
        tokens
    }

    /// Dictionary records are absorbed by the session and never matched.
    pub fn is_dictionary(&self) -> bool {
        matches!(
            self.rec,
            rec::SIG_DICT | rec::OBJ_DICT | rec::FUN_DICT | rec::USR_DICT
        )
    }

    /// The target announces itself with a target-info record after a reset.
    pub fn is_reset_marker(&self) -> bool {
        self.rec == rec::TARGET_INFO
    }

    pub fn is_pause(&self) -> bool {
        self.rec == rec::TEST_PAUSED
    }

    /// The target hit an assertion and now waits for a reset.
    pub fn is_assertion(&self) -> bool {
        self.rec == rec::ASSERT_FAIL
    }

    /// Whether consuming this record ends the outstanding run-to-completion
    /// step: its completion report, a receive error or a failed assertion.
    pub fn is_run_terminal(&self) -> bool {
        self.rec == rec::TARGET_DONE
            || self.is_assertion()
            || (self.rec == rec::RX_STATUS && self.kind() == kind::ERROR)
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for token in self.tokens() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "{}", token)?;
        }
        Ok(())
    }
}
