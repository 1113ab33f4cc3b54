//! Script line tokenizer
//!
//! A line is split into words on blanks. A `#` outside quotes ends the line.
//! Single quotes group blanks into one word and suppress `$VAR` expansion;
//! `''` inside quotes stands for one literal quote. A word may mix quoted
//! and bare parts, so each word is kept as a list of fragments and expansion
//! is left to the engine.

use std::fmt;

/// Part of a word, quoted or bare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgFragment {
    pub s: String,
    /// Came from inside single quotes; never expanded
    pub quoted: bool,
}

/// A command line of a script section.
#[derive(Debug, Clone)]
pub struct ScriptLine {
    pub command: String,
    /// One fragment list per argument word
    pub raw_args: Vec<Vec<ArgFragment>>,
    /// The line as written, for the transcript and error messages
    pub raw: String,
    pub line_number: usize,
}

impl ScriptLine {
    /// Arguments with fragments joined and no expansion applied.
    pub fn literal_args(&self) -> Vec<String> {
        self.raw_args.iter().map(|word| join(word)).collect()
    }
}

fn join(word: &[ArgFragment]) -> String {
    word.iter().map(|f| f.s.as_str()).collect()
}

#[derive(Debug)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Accumulates the fragments of the word being read.
#[derive(Default)]
struct Word {
    frags: Vec<ArgFragment>,
    bare: String,
}

impl Word {
    fn flush_bare(&mut self) {
        if !self.bare.is_empty() {
            let s = std::mem::take(&mut self.bare);
            self.frags.push(ArgFragment { s, quoted: false });
        }
    }

    fn finish(mut self) -> Option<Vec<ArgFragment>> {
        self.flush_bare();
        (!self.frags.is_empty()).then_some(self.frags)
    }
}

/// Split `line` into the command name and argument words.
///
/// Blank and comment-only lines give `Ok(None)`. The command name has to be
/// a single bare word.
pub fn parse_line(line: &str, line_number: usize) -> Result<Option<ScriptLine>, ParseError> {
    let error = |message: &str| ParseError {
        message: message.to_string(),
        line: line_number,
    };

    let mut words: Vec<Vec<ArgFragment>> = Vec::new();
    let mut word = Word::default();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '#' => break,
            ' ' | '\t' | '\r' | '\n' => {
                if let Some(done) = std::mem::take(&mut word).finish() {
                    words.push(done);
                }
            }
            '\'' => {
                word.flush_bare();
                let mut quoted = String::new();
                loop {
                    match chars.next() {
                        None => return Err(error("unterminated quoted argument")),
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            quoted.push('\'');
                        }
                        Some('\'') => break,
                        Some(q) => quoted.push(q),
                    }
                }
                word.frags.push(ArgFragment { s: quoted, quoted: true });
            }
            c => word.bare.push(c),
        }
    }
    if let Some(done) = word.finish() {
        words.push(done);
    }

    let mut words = words.into_iter();
    let Some(first) = words.next() else {
        return Ok(None);
    };
    let command = match first.as_slice() {
        [ArgFragment { s, quoted: false }] => s.clone(),
        _ => return Err(error("command name must not be quoted")),
    };

    Ok(Some(ScriptLine {
        command,
        raw_args: words.collect(),
        raw: line.to_string(),
        line_number,
    }))
}

/// Replace `$NAME` and `${NAME}` with their values; unknown names become
/// empty. A `$` not followed by a name is kept.
pub fn expand_vars(s: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, tail) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], &braced[end + 1..]),
                None => (braced, ""),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            if end == 0 {
                out.push('$');
                rest = after;
                continue;
            }
            (&after[..end], &after[end..])
        };

        out.push_str(&lookup(name).unwrap_or_default());
        rest = tail;
    }
    out.push_str(rest);
    out
}
