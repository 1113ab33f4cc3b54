//! Symbol dictionaries announced by the target
//!
//! After a reset the target emits dictionary records mapping numeric signal
//! values, object addresses and function addresses to names. Scripts refer to
//! the names; command encoding needs the numbers.

use std::collections::HashMap;

use crate::record::{rec, TraceRecord};

/// Which dictionary a name lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DictKind {
    Signal,
    Object,
    Function,
}

impl DictKind {
    fn of_record(rec_id: u8) -> Option<Self> {
        match rec_id {
            rec::SIG_DICT => Some(DictKind::Signal),
            rec::OBJ_DICT => Some(DictKind::Object),
            rec::FUN_DICT => Some(DictKind::Function),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            DictKind::Signal => "signal",
            DictKind::Object => "object",
            DictKind::Function => "function",
        }
    }
}

/// Parse `0x..` hex or decimal.
pub fn parse_number(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Dictionaries {
    entries: HashMap<(DictKind, String), u64>,
}

impl Dictionaries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take in a dictionary record (`<kind> <value> <name>`). Returns whether
    /// the record was a usable dictionary entry; user dictionaries and
    /// malformed entries are ignored.
    pub fn absorb(&mut self, record: &TraceRecord) -> bool {
        let Some(kind) = DictKind::of_record(record.rec) else {
            return false;
        };
        let [_, value, name] = record.fields.as_slice() else {
            tracing::warn!("ignoring malformed dictionary record: {}", record);
            return false;
        };
        let Some(value) = parse_number(value) else {
            tracing::warn!("ignoring dictionary record with bad value: {}", record);
            return false;
        };
        tracing::debug!(kind = kind.label(), value, "dictionary {}", name);
        self.entries.insert((kind, name.clone()), value);
        true
    }

    pub fn insert(&mut self, kind: DictKind, name: impl Into<String>, value: u64) {
        self.entries.insert((kind, name.into()), value);
    }

    pub fn lookup(&self, kind: DictKind, name: &str) -> Option<u64> {
        self.entries.get(&(kind, name.to_string())).copied()
    }

    /// Resolve a script argument: a numeric literal, or a name announced by
    /// the target.
    pub fn resolve(&self, kind: DictKind, arg: &str) -> Result<u64, String> {
        parse_number(arg)
            .or_else(|| self.lookup(kind, arg))
            .ok_or_else(|| format!("unknown {} {:?}", kind.label(), arg))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
