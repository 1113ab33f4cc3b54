//! Expectation queue
//!
//! Strict FIFO of declared patterns. A record is only ever compared with the
//! head; anything else arriving is a protocol violation, not noise.

use std::collections::VecDeque;

use crate::pattern::{matches, ExpectationPattern};
use crate::record::TraceRecord;

/// The head pattern and the record that failed to match it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub expected: ExpectationPattern,
    pub actual: TraceRecord,
}

#[derive(Debug, Default)]
pub struct ExpectationQueue {
    pending: VecDeque<ExpectationPattern>,
}

impl ExpectationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pattern: ExpectationPattern) {
        self.pending.push_back(pattern);
    }

    /// Match `record` against the head: pop it on success, leave it in place
    /// on failure. `Err(None)` means there was no head to match against.
    pub fn offer(&mut self, record: &TraceRecord) -> Result<(), Option<Mismatch>> {
        let head = self.pending.front().ok_or(None)?;
        if matches(head, record) {
            self.pending.pop_front();
            Ok(())
        } else {
            Err(Some(Mismatch {
                expected: head.clone(),
                actual: record.clone(),
            }))
        }
    }

    pub fn head(&self) -> Option<&ExpectationPattern> {
        self.pending.front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// The end-of-test check: succeeds only when every declared pattern has
    /// been matched, otherwise hands back the unmet ones and empties the queue.
    pub fn require_empty(&mut self) -> Result<(), Vec<ExpectationPattern>> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(self.pending.drain(..).collect())
        }
    }
}
