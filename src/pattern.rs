//! Expectation patterns and the matcher
//!
//! A pattern mirrors the token shape of a [`TraceRecord`]. Each position is
//! a literal, a wildcard (`*`, any single token) or the timestamp marker
//! (`@timestamp` / `%timestamp`, any single token). A wildcard in the last
//! position also absorbs any remaining record tokens.

use std::fmt;

use crate::record::{Token, TraceRecord};

/// Spellings of the timestamp position in a pattern string.
pub const TIMESTAMP_MARKERS: &[&str] = &["@timestamp", "%timestamp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternToken {
    Literal(String),
    Wildcard,
    Ignore,
}

impl fmt::Display for PatternToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternToken::Literal(s) => f.write_str(s),
            PatternToken::Wildcard => f.write_str("*"),
            PatternToken::Ignore => f.write_str(TIMESTAMP_MARKERS[0]),
        }
    }
}

/// An expected record, in declaration form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectationPattern {
    tokens: Vec<PatternToken>,
}

impl ExpectationPattern {
    /// Parse a whitespace-separated pattern string.
    ///
    /// Returns `None` for an empty pattern: it could only ever match an empty
    /// record, which the decoder never produces.
    pub fn parse(s: &str) -> Option<Self> {
        let tokens: Vec<PatternToken> = s
            .split_ascii_whitespace()
            .map(|t| match t {
                "*" => PatternToken::Wildcard,
                t if TIMESTAMP_MARKERS.contains(&t) => PatternToken::Ignore,
                t => PatternToken::Literal(t.to_string()),
            })
            .collect();
        if tokens.is_empty() {
            None
        } else {
            Some(Self { tokens })
        }
    }

    pub fn from_tokens(tokens: Vec<PatternToken>) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &[PatternToken] {
        &self.tokens
    }
}

impl fmt::Display for ExpectationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: Vec<String> = self.tokens.iter().map(|t| t.to_string()).collect();
        f.write_str(&text.join(" "))
    }
}

/// Positional, token-wise match of `record` against `pattern`.
///
/// A record's timestamp is never compared literally, whatever the pattern
/// holds at that position.
pub fn matches(pattern: &ExpectationPattern, record: &TraceRecord) -> bool {
    let actual = record.tokens();
    let expected = pattern.tokens();

    for (i, want) in expected.iter().enumerate() {
        if *want == PatternToken::Wildcard && i + 1 == expected.len() {
            return actual.len() >= i;
        }
        let Some(got) = actual.get(i) else {
            return false;
        };
        let ok = match (want, got) {
            (_, Token::Timestamp(_)) => true,
            (PatternToken::Wildcard | PatternToken::Ignore, _) => true,
            (PatternToken::Literal(lit), Token::Field(field)) => lit == field,
        };
        if !ok {
            return false;
        }
    }
    expected.len() == actual.len()
}
