//! Session controller
//!
//! A [`Session`] owns everything tied to one live target connection: the
//! command channel, the receiving end of the decoder thread, the expectation
//! queue, the filter state and the current-object handle. Test bodies drive
//! the target exclusively through it.
//!
//! Every command first drains the pending expectations against the live
//! record stream, so a body reads as a straight sequence of "do this, expect
//! that" steps while the records are still matched strictly in order.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::channel::{prio, Command, CommandChannel, TargetLayout};
use crate::decoder::{spawn_reader, DecodeError};
use crate::dictionary::{DictKind, Dictionaries};
use crate::error::{ErrorKind, HarnessError};
use crate::filter::{FilterSet, ObjKind};
use crate::pattern::{ExpectationPattern, PatternToken};
use crate::queue::ExpectationQueue;
use crate::record::{kind, TraceRecord};

/// A script hook run against the live session.
pub type Hook = dyn Fn(&mut Session) -> Result<(), HarnessError>;

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long to wait for each expected record
    pub timeout: Duration,
    /// Record every attempted match in the session log
    pub verbose: bool,
    /// Field widths of the target build
    pub layout: TargetLayout,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            verbose: false,
            layout: TargetLayout::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    AwaitingReset,
    Ready,
    Running { step: usize },
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Closed => f.write_str("closed"),
            SessionState::AwaitingReset => f.write_str("awaiting reset"),
            SessionState::Ready => f.write_str("ready"),
            SessionState::Running { step } => write!(f, "running step {}", step),
            SessionState::Failed => f.write_str("failed"),
        }
    }
}

/// Whether a test case starts from a freshly reset target or from whatever
/// the previous case left behind (filters and current objects included).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Continuity {
    #[default]
    Reset,
    Continue,
}

/// The objects that target-relative commands implicitly address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetHandle {
    current: HashMap<ObjKind, u64>,
}

impl TargetHandle {
    pub fn set(&mut self, kind: ObjKind, addr: u64) {
        for slot in kind.slots() {
            self.current.insert(*slot, addr);
        }
    }

    pub fn get(&self, kind: ObjKind) -> Option<u64> {
        self.current.get(&kind).copied()
    }

    /// The current object of `kind`, or a usage error naming the command
    /// that needed it.
    pub fn require(&self, kind: ObjKind, cmd: &str) -> Result<u64, HarnessError> {
        self.get(kind).ok_or_else(|| {
            HarnessError::new(
                ErrorKind::Usage,
                format!("{} needs a current {} object (use current_obj {} NAME)", cmd, kind, kind),
            )
        })
    }

    pub fn clear(&mut self) {
        self.current.clear();
    }
}

type Inbound = Receiver<Result<TraceRecord, DecodeError>>;

pub struct Session {
    config: SessionConfig,
    state: SessionState,
    channel: CommandChannel<Box<dyn Write + Send>>,
    records: Inbound,
    _reader: JoinHandle<()>,
    /// Run once on close to unblock the reader thread
    shutdown: Option<Box<dyn FnOnce() + Send>>,
    queue: ExpectationQueue,
    filters: FilterSet,
    handle: TargetHandle,
    dictionaries: Dictionaries,
    step: usize,
    case: Option<String>,
    /// An assertion record was consumed; only a reset brings the target back
    asserted: bool,
    /// Human-readable transcript of the current case
    pub log: String,
}

impl Session {
    /// Open a session over an established byte channel. The target still
    /// has to be reset before the first test case.
    ///
    /// The reader runs on its own thread until it sees end of stream. Links
    /// that cannot be closed by dropping the writer should register a
    /// [`Session::on_close`] action, or the thread stays blocked on read.
    pub fn open<R, W>(reader: R, writer: W, config: SessionConfig) -> io::Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let reader = spawn_reader(reader, tx)?;
        let channel = CommandChannel::new(Box::new(writer) as Box<dyn Write + Send>, config.layout);
        tracing::debug!(timeout_ms = config.timeout.as_millis() as u64, "session opened");
        Ok(Self {
            config,
            state: SessionState::AwaitingReset,
            channel,
            records: rx,
            _reader: reader,
            shutdown: None,
            queue: ExpectationQueue::new(),
            filters: FilterSet::new(),
            handle: TargetHandle::default(),
            dictionaries: Dictionaries::new(),
            step: 0,
            case: None,
            asserted: false,
            log: String::new(),
        })
    }

    /// Connect to a target (or a relay in front of it) over TCP.
    pub fn connect(addr: impl ToSocketAddrs, config: SessionConfig) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;
        let link = stream.try_clone()?;
        tracing::info!(peer = %stream.peer_addr()?, "connected to target");
        let mut session = Self::open(reader, stream, config)?;
        session.on_close(move || {
            if let Err(e) = link.shutdown(Shutdown::Both) {
                tracing::debug!("shutting down target link: {}", e);
            }
        });
        Ok(session)
    }

    /// Register the action that ends the link when the session closes.
    pub fn on_close(&mut self, shutdown: impl FnOnce() + Send + 'static) {
        self.shutdown = Some(Box::new(shutdown));
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn target_handle(&self) -> &TargetHandle {
        &self.handle
    }

    pub fn dictionaries(&self) -> &Dictionaries {
        &self.dictionaries
    }

    pub fn dictionaries_mut(&mut self) -> &mut Dictionaries {
        &mut self.dictionaries
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn case_name(&self) -> Option<&str> {
        self.case.as_deref()
    }

    /// Write a log entry
    pub fn logf(&mut self, msg: &str) {
        self.log.push_str(msg);
        if !msg.ends_with('\n') {
            self.log.push('\n');
        }
    }

    pub fn take_log(&mut self) -> String {
        std::mem::take(&mut self.log)
    }

    /// No further commands are issued once closed.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.queue.clear();
        if let Some(shutdown) = self.shutdown.take() {
            // also ends the reader thread blocked on the other handle
            shutdown();
        }
        tracing::debug!("session closed");
    }

    // ── lifecycle ─────────────────────────────────────────

    /// Reset the target and bring the session to `Ready`.
    ///
    /// Without a hook the target is expected to pause once after the reset
    /// and is then told to continue.
    pub fn reset(&mut self, on_reset: Option<&Hook>) -> Result<(), HarnessError> {
        match self.state {
            SessionState::AwaitingReset | SessionState::Ready => {}
            state => {
                return Err(HarnessError::protocol(format!(
                    "cannot reset the target while the session is {}",
                    state
                )))
            }
        }
        self.state = SessionState::AwaitingReset;
        self.queue.clear();
        self.filters.reset();
        self.handle.clear();
        self.dictionaries.clear();
        self.asserted = false;

        self.channel.send(&Command::Reset)?;
        self.channel.reset_sequence();
        self.logf("-> QS_RX_RESET");
        self.await_target_info()?;

        match on_reset {
            Some(hook) => hook(self)?,
            None => {
                self.expect_pause();
                self.continue_test()?;
            }
        }
        self.drain()?;
        self.state = SessionState::Ready;
        tracing::debug!(dictionary_entries = self.dictionaries.len(), "target reset");
        Ok(())
    }

    /// Discard everything up to the target's post-reset announcement.
    fn await_target_info(&mut self) -> Result<(), HarnessError> {
        let deadline = Instant::now() + self.config.timeout;
        loop {
            match self.next_record(deadline)? {
                Some(record) if record.is_reset_marker() => {
                    self.logf(&format!("<- {}", record));
                    return Ok(());
                }
                Some(record) => {
                    tracing::debug!("discarding {} while waiting for the target to reset", record);
                }
                None => {
                    return Err(HarnessError::new(
                        ErrorKind::Timeout,
                        format!(
                            "expected: {}\n  actual: no record received within {}ms",
                            kind::INFO,
                            self.config.timeout.as_millis()
                        ),
                    ))
                }
            }
        }
    }

    /// Enter `Running` for a new test case, resetting the target first
    /// unless the case continues from the previous one.
    pub fn begin_case(
        &mut self,
        name: &str,
        continuity: Continuity,
        on_reset: Option<&Hook>,
    ) -> Result<(), HarnessError> {
        match (self.state, continuity) {
            (SessionState::Ready, _) | (SessionState::AwaitingReset, Continuity::Reset) => {}
            (state, _) => {
                return Err(HarnessError::protocol(format!(
                    "cannot begin test {:?} while the session is {}",
                    name, state
                )))
            }
        }
        self.case = Some(name.to_string());
        tracing::info!(case = name, ?continuity, "begin test");
        if continuity == Continuity::Reset {
            self.reset(on_reset)?;
        }
        self.issue(Command::TestSetup)?;
        self.step += 1;
        self.state = SessionState::Running { step: self.step };
        Ok(())
    }

    /// Leave `Running`: every expectation must have been met, the last run
    /// must have reported completion, and nothing else may have arrived.
    pub fn end_case(&mut self, on_teardown: Option<&Hook>) -> Result<(), HarnessError> {
        if !matches!(self.state, SessionState::Running { .. }) {
            return Err(HarnessError::protocol(format!(
                "cannot end a test while the session is {}",
                self.state
            )));
        }
        if let Err(e) = self.drain() {
            if e.kind != ErrorKind::Timeout {
                return Err(e);
            }
            let unmet = self.queue.require_empty().err().unwrap_or_default();
            let mut err = HarnessError::not_drained(&unmet);
            err.message.push_str(&format!(
                "\n  (waited {}ms for the first one)",
                self.config.timeout.as_millis()
            ));
            return Err(err);
        }
        self.queue
            .require_empty()
            .map_err(|unmet| HarnessError::not_drained(&unmet))?;
        if let Some(name) = self.channel.outstanding_run() {
            let done = done_pattern(name);
            return Err(HarnessError::new(
                ErrorKind::QueueNotDrained,
                format!("run of {} was never seen to complete\n  missing: {}", name, done),
            ));
        }
        self.reject_unexpected()?;

        // a target parked in its assertion handler answers nothing but a reset
        if self.asserted {
            self.state = SessionState::AwaitingReset;
            if let Some(name) = self.case.take() {
                tracing::info!(case = %name, "end test, target asserted");
            }
            return Ok(());
        }

        self.issue(Command::TestTeardown)?;
        if let Some(hook) = on_teardown {
            hook(self)?;
        }
        self.drain()?;
        self.state = SessionState::Ready;
        if let Some(name) = self.case.take() {
            tracing::info!(case = %name, "end test");
        }
        Ok(())
    }

    /// Record the failure of the current case. Errors that make the stream
    /// untrustworthy end the session; anything else only forces a reset
    /// before the next case.
    pub fn abort_case(&mut self, error: &HarnessError) {
        self.queue.clear();
        if self.state == SessionState::Closed {
            return;
        }
        self.state = if error.is_fatal() {
            SessionState::Failed
        } else {
            SessionState::AwaitingReset
        };
        let case = self.case.take().unwrap_or_default();
        tracing::debug!(case = %case, state = %self.state, "test aborted: {}", error.message);
    }

    // ── record flow ───────────────────────────────────────

    /// Next non-dictionary record, or `None` once `deadline` has passed.
    fn next_record(&mut self, deadline: Instant) -> Result<Option<TraceRecord>, HarnessError> {
        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            match self.records.recv_timeout(wait) {
                Ok(Ok(record)) => {
                    if record.is_dictionary() {
                        self.dictionaries.absorb(&record);
                        continue;
                    }
                    tracing::debug!(seq = record.seq, rec = record.rec, "received {}", record);
                    return Ok(Some(record));
                }
                Ok(Err(e)) => {
                    self.logf(&format!("[decode error: {}]", e));
                    return Err(e.into());
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(HarnessError::new(ErrorKind::Io, "trace stream closed by the target"))
                }
            }
        }
    }

    /// Match arriving records against the queue until it is empty.
    pub fn drain(&mut self) -> Result<(), HarnessError> {
        while let Some(head) = self.queue.head().cloned() {
            let deadline = Instant::now() + self.config.timeout;
            let Some(record) = self.next_record(deadline)? else {
                self.logf(&format!("[timeout waiting for: {}]", head));
                return Err(HarnessError::timeout(&head, self.config.timeout.as_millis()));
            };
            tracing::trace!("match {} against {}", record, head);
            if self.config.verbose {
                self.logf(&format!("   ~ {} =? {}", head, record));
            }
            match self.queue.offer(&record) {
                Ok(()) => self.consume(&record),
                Err(Some(mismatch)) => {
                    self.logf(&format!("<! {}", record));
                    return Err(HarnessError::mismatch(&mismatch));
                }
                Err(None) => return Err(HarnessError::unexpected(&record)),
            }
        }
        Ok(())
    }

    fn consume(&mut self, record: &TraceRecord) {
        self.logf(&format!("<- {}", record));
        if record.is_run_terminal() {
            self.channel.complete_run();
        }
        if record.is_assertion() {
            self.asserted = true;
        }
    }

    /// Fail on any record that has already arrived without being expected.
    fn reject_unexpected(&mut self) -> Result<(), HarnessError> {
        loop {
            match self.records.try_recv() {
                Ok(Ok(record)) if record.is_dictionary() => {
                    self.dictionaries.absorb(&record);
                }
                Ok(Ok(record)) => {
                    self.logf(&format!("<! {}", record));
                    return Err(HarnessError::unexpected(&record));
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    /// Drain, then send `cmd` and queue its acknowledgement.
    fn issue(&mut self, cmd: Command) -> Result<(), HarnessError> {
        match self.state {
            SessionState::Closed | SessionState::Failed => {
                return Err(HarnessError::protocol(format!(
                    "cannot send {} while the session is {}",
                    cmd, self.state
                )))
            }
            _ => {}
        }
        self.drain()?;
        self.channel.send(&cmd)?;
        self.logf(&format!("-> {}", cmd));
        if acknowledged(&cmd) {
            self.queue.push(ack_pattern(cmd.name()));
        }
        Ok(())
    }

    // ── expectations ──────────────────────────────────────

    /// Queue an expectation given in pattern syntax.
    pub fn expect(&mut self, pattern: &str) -> Result<(), HarnessError> {
        let pattern = ExpectationPattern::parse(pattern)
            .ok_or_else(|| HarnessError::usage("expect", "PATTERN..."))?;
        self.expect_pattern(pattern);
        Ok(())
    }

    pub fn expect_pattern(&mut self, pattern: ExpectationPattern) {
        tracing::trace!("expect {}", pattern);
        self.queue.push(pattern);
    }

    /// The target paused itself and waits for `continue_test`.
    pub fn expect_pause(&mut self) {
        self.expect_pattern(literal_pattern(&[kind::PAUSED]));
    }

    /// The target entered its event loop.
    pub fn expect_run(&mut self) {
        self.expect_pattern(literal_pattern(&[kind::RUN]));
    }

    // ── commands ──────────────────────────────────────────

    pub fn continue_test(&mut self) -> Result<(), HarnessError> {
        self.issue(Command::TestContinue)
    }

    pub fn info(&mut self) -> Result<(), HarnessError> {
        self.issue(Command::Info)
    }

    /// Update the global filter; see [`FilterSet::apply_global`].
    pub fn glb_filter<S: AsRef<str>>(&mut self, items: &[S]) -> Result<(), HarnessError> {
        let mut filters = self.filters.clone();
        filters.apply_global(items).map_err(|item| {
            HarnessError::new(ErrorKind::Usage, format!("unknown filter group {:?}", item))
        })?;
        self.issue(Command::GlbFilter { mask: filters.global_bytes() })?;
        self.filters = filters;
        Ok(())
    }

    /// Restrict output to the given objects of `kind`.
    pub fn loc_filter<S: AsRef<str>>(&mut self, kind: ObjKind, ids: &[S]) -> Result<(), HarnessError> {
        for id in ids {
            let addr = self.resolve(DictKind::Object, id.as_ref())?;
            self.issue(Command::LocFilter { kind, addr })?;
            self.filters.add_local(kind, addr);
        }
        Ok(())
    }

    pub fn ao_filter(&mut self, prio: u8) -> Result<(), HarnessError> {
        if prio > prio::MAX_ACTIVE {
            return Err(HarnessError::new(
                ErrorKind::Usage,
                format!("priority {} out of range 0..={}", prio, prio::MAX_ACTIVE),
            ));
        }
        self.issue(Command::AoFilter { prio })
    }

    /// Make `name` the current object of `kind`.
    pub fn current_obj(&mut self, kind: ObjKind, name: &str) -> Result<(), HarnessError> {
        let addr = self.resolve(DictKind::Object, name)?;
        self.issue(Command::CurrObj { kind, addr })?;
        self.handle.set(kind, addr);
        Ok(())
    }

    pub fn query_curr(&mut self, kind: ObjKind) -> Result<(), HarnessError> {
        self.issue(Command::QueryCurr { kind })
    }

    /// Post an event to the current active object.
    pub fn post(&mut self, signal: &str, params: Bytes) -> Result<(), HarnessError> {
        let target = self.handle.require(ObjKind::Ao, "post")?;
        self.send_event(prio::POST_CURRENT, signal, params, Some(target))
    }

    /// Publish an event to every subscriber.
    pub fn publish(&mut self, signal: &str, params: Bytes) -> Result<(), HarnessError> {
        self.send_event(prio::PUBLISH, signal, params, None)
    }

    /// Dispatch an event directly to the current state machine.
    pub fn dispatch(&mut self, signal: &str, params: Bytes) -> Result<(), HarnessError> {
        let target = self.handle.require(ObjKind::Sm, "dispatch")?;
        self.send_event(prio::DISPATCH_CURRENT, signal, params, Some(target))
    }

    /// Trigger the initial transition of the current state machine.
    pub fn init(&mut self, signal: Option<&str>, params: Bytes) -> Result<(), HarnessError> {
        let target = self.handle.require(ObjKind::Sm, "init")?;
        self.send_event(prio::INIT_CURRENT, signal.unwrap_or("0"), params, Some(target))
    }

    /// Post an event to the active object at a fixed priority.
    pub fn post_to(&mut self, prio: u8, signal: &str, params: Bytes) -> Result<(), HarnessError> {
        if !(1..=prio::MAX_ACTIVE).contains(&prio) {
            return Err(HarnessError::new(
                ErrorKind::Usage,
                format!("priority {} out of range 1..={}", prio, prio::MAX_ACTIVE),
            ));
        }
        self.send_event(prio, signal, params, None)
    }

    fn send_event(
        &mut self,
        prio: u8,
        signal: &str,
        params: Bytes,
        target: Option<u64>,
    ) -> Result<(), HarnessError> {
        let sig = self.resolve(DictKind::Signal, signal)?;
        let width = u32::from(self.channel.layout().sig_size) * 8;
        if width < 64 && sig >> width != 0 {
            return Err(HarnessError::new(
                ErrorKind::Usage,
                format!("signal {} does not fit in {} bits", sig, width),
            ));
        }
        if params.len() > usize::from(u16::MAX) {
            return Err(HarnessError::new(
                ErrorKind::Usage,
                format!("event parameters are {} bytes, at most {} fit", params.len(), u16::MAX),
            ));
        }
        if let Some(addr) = target {
            tracing::debug!(prio, sig, object = %format!("0x{:08X}", addr), "event {}", signal);
        }
        self.issue(Command::Event { prio, sig, params })
    }

    /// Advance the target's clock tick at `rate`.
    pub fn tick(&mut self, rate: u8) -> Result<(), HarnessError> {
        self.issue(Command::Tick { rate })
    }

    /// Run the target's application-specific command handler.
    pub fn command(&mut self, id: u8, params: [u32; 3]) -> Result<(), HarnessError> {
        self.issue(Command::Command { id, params })
    }

    /// Arm a test probe for `function`.
    pub fn probe(&mut self, function: &str, value: u32) -> Result<(), HarnessError> {
        let addr = self.resolve(DictKind::Function, function)?;
        self.issue(Command::TestProbe { data: value, addr })
    }

    /// Write `data` into the current application object, `size` bytes each.
    pub fn poke(&mut self, offset: u16, size: u8, data: Vec<u32>) -> Result<(), HarnessError> {
        self.handle.require(ObjKind::Ap, "poke")?;
        check_item_size("poke", size)?;
        if data.is_empty() || data.len() > usize::from(u8::MAX) {
            return Err(HarnessError::usage("poke", "OFFSET SIZE VALUE..."));
        }
        for value in &data {
            check_item_value("poke", size, *value)?;
        }
        self.issue(Command::Poke { offset, size, data })
    }

    pub fn fill(&mut self, offset: u16, size: u8, num: u8, value: u32) -> Result<(), HarnessError> {
        self.handle.require(ObjKind::Ap, "fill")?;
        check_item_size("fill", size)?;
        check_item_value("fill", size, value)?;
        self.issue(Command::Fill { offset, size, num, value })
    }

    /// Request a memory dump of the current application object.
    pub fn peek(&mut self, offset: u16, size: u8, num: u8) -> Result<(), HarnessError> {
        self.handle.require(ObjKind::Ap, "peek")?;
        check_item_size("peek", size)?;
        self.issue(Command::Peek { offset, size, num })
    }

    fn resolve(&self, kind: DictKind, name: &str) -> Result<u64, HarnessError> {
        self.dictionaries
            .resolve(kind, name)
            .map_err(|msg| HarnessError::new(ErrorKind::Usage, msg))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn check_item_value(cmd: &str, size: u8, value: u32) -> Result<(), HarnessError> {
    if size < 4 && value >> (8 * u32::from(size)) != 0 {
        return Err(HarnessError::new(
            ErrorKind::Usage,
            format!("{}: value 0x{:X} does not fit in {} byte(s)", cmd, value, size),
        ));
    }
    Ok(())
}

fn check_item_size(cmd: &str, size: u8) -> Result<(), HarnessError> {
    match size {
        1 | 2 | 4 => Ok(()),
        _ => Err(HarnessError::new(
            ErrorKind::Usage,
            format!("{}: item size must be 1, 2 or 4, not {}", cmd, size),
        )),
    }
}

/// Commands the target answers with a `Trg-Ack` status record.
fn acknowledged(cmd: &Command) -> bool {
    !matches!(cmd, Command::Info | Command::Reset | Command::Peek { .. } | Command::QueryCurr { .. })
}

fn literal_pattern(tokens: &[&str]) -> ExpectationPattern {
    ExpectationPattern::from_tokens(
        tokens
            .iter()
            .map(|t| PatternToken::Literal(t.to_string()))
            .collect(),
    )
}

fn ack_pattern(name: &str) -> ExpectationPattern {
    literal_pattern(&[kind::ACK, name])
}

fn done_pattern(name: &str) -> ExpectationPattern {
    let mut tokens = vec![PatternToken::Ignore];
    tokens.extend(literal_pattern(&[kind::DONE, name]).tokens().iter().cloned());
    ExpectationPattern::from_tokens(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::encode_record;
    use crate::frame::Deframer;
    use crate::record::rec;
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::mpsc::Sender;
    use std::sync::{Arc, Mutex};

    type Batch = Vec<(u8, Option<u32>, &'static str)>;

    /// Answers each command frame with the next canned batch of records.
    struct FakeTarget {
        tx: Sender<Vec<u8>>,
        replies: VecDeque<Batch>,
        deframer: Deframer,
        seq: u8,
        sent: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for FakeTarget {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            for b in buf {
                let Some(Ok(frame)) = self.deframer.push(*b) else {
                    continue;
                };
                self.sent.lock().unwrap().push(frame[1]);
                for (r, ts, text) in self.replies.pop_front().unwrap_or_default() {
                    self.seq = self.seq.wrapping_add(1);
                    let record = TraceRecord::new(self.seq, r, ts, text);
                    let _ = self.tx.send(encode_record(&record).to_vec());
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Wire {
        rx: Receiver<Vec<u8>>,
        pending: Cursor<Vec<u8>>,
    }

    impl Read for Wire {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            loop {
                let n = self.pending.read(buf)?;
                if n > 0 {
                    return Ok(n);
                }
                match self.rx.recv() {
                    Ok(bytes) => self.pending = Cursor::new(bytes),
                    Err(_) => return Ok(0),
                }
            }
        }
    }

    fn session(replies: Vec<Batch>) -> (Session, Arc<Mutex<Vec<u8>>>) {
        let (tx, rx) = mpsc::channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let target = FakeTarget {
            tx,
            replies: replies.into(),
            deframer: Deframer::new(),
            seq: 0,
            sent: sent.clone(),
        };
        let wire = Wire { rx, pending: Cursor::new(Vec::new()) };
        let config = SessionConfig {
            timeout: Duration::from_millis(200),
            ..SessionConfig::default()
        };
        (Session::open(wire, target, config).unwrap(), sent)
    }

    fn ack(name: &'static str) -> (u8, Option<u32>, &'static str) {
        (rec::RX_STATUS, None, name)
    }

    /// Replies to RESET and the default TEST_CONTINUE, then TEST_SETUP.
    fn boot() -> Vec<Batch> {
        vec![
            vec![
                (rec::TARGET_INFO, None, "Trg-Info QP-Ver=720"),
                (rec::OBJ_DICT, None, "ObjDic 0x20000100 AO_Philo"),
                (rec::SIG_DICT, None, "SigDic 6 EAT_SIG"),
                (rec::TEST_PAUSED, None, "TstPause"),
            ],
            vec![ack("Trg-Ack QS_RX_TEST_CONTINUE")],
            vec![ack("Trg-Ack QS_RX_TEST_SETUP")],
        ]
    }

    #[test]
    fn test_reset_reaches_ready() {
        let (mut s, sent) = session(boot());
        assert_eq!(s.state(), SessionState::AwaitingReset);
        s.reset(None).unwrap();
        assert_eq!(s.state(), SessionState::Ready);
        assert_eq!(s.dictionaries().len(), 2);
        assert_eq!(*sent.lock().unwrap(), vec![2, 14]);
    }

    #[test]
    fn test_full_case_with_event() {
        let mut replies = boot();
        replies.extend([
            vec![ack("Trg-Ack QS_RX_CURR_OBJ")],
            vec![
                ack("Trg-Ack QS_RX_EVENT"),
                (6, Some(10), "Tran Obj=AO_Philo thinking->eating"),
                (rec::TARGET_DONE, Some(11), "Trg-Done QS_RX_EVENT"),
            ],
            vec![ack("Trg-Ack QS_RX_TEST_TEARDOWN")],
        ]);
        let (mut s, sent) = session(replies);
        s.begin_case("eat", Continuity::Reset, None).unwrap();
        assert_eq!(s.state(), SessionState::Running { step: 1 });
        s.current_obj(ObjKind::SmAo, "AO_Philo").unwrap();
        s.post("EAT_SIG", Bytes::new()).unwrap();
        s.expect("@timestamp Tran * thinking->eating").unwrap();
        s.expect("@timestamp Trg-Done QS_RX_EVENT").unwrap();
        s.end_case(None).unwrap();
        assert_eq!(s.state(), SessionState::Ready);
        assert_eq!(s.target_handle().get(ObjKind::Sm), Some(0x2000_0100));
        assert_eq!(*sent.lock().unwrap(), vec![2, 14, 7, 13, 16, 8]);
        assert!(s.log.contains("<- 0000000010 Tran Obj=AO_Philo thinking->eating"));
    }

    #[test]
    fn test_command_during_run_is_protocol_violation() {
        let mut replies = boot();
        replies.push(vec![ack("Trg-Ack QS_RX_EVENT")]);
        let (mut s, _) = session(replies);
        s.begin_case("twice", Continuity::Reset, None).unwrap();
        s.publish("EAT_SIG", Bytes::new()).unwrap();
        let err = s.publish("EAT_SIG", Bytes::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProtocolViolation);
        s.abort_case(&err);
        assert_eq!(s.state(), SessionState::Failed);
        assert!(s.reset(None).is_err());
    }

    #[test]
    fn test_mismatch_then_next_case_needs_reset() {
        let mut replies = boot();
        replies[2].push((100, None, "Post Sig=TIMEOUT"));
        let (mut s, _) = session(replies);
        s.begin_case("mismatch", Continuity::Reset, None).unwrap();
        s.expect("Post Sig=EAT").unwrap();
        let err = s.end_case(None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MatchMismatch);
        assert!(err.message.contains("Sig=TIMEOUT"));
        s.abort_case(&err);
        assert_eq!(s.state(), SessionState::AwaitingReset);
        assert!(s.begin_case("next", Continuity::Continue, None).is_err());
    }

    #[test]
    fn test_unmet_expectation_at_end_is_not_drained() {
        let (mut s, _) = session(boot());
        s.begin_case("silent", Continuity::Reset, None).unwrap();
        s.expect("Never here").unwrap();
        let err = s.end_case(None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::QueueNotDrained);
        assert!(err.message.contains("pending: Never here"));
    }

    #[test]
    fn test_timeout_mid_case() {
        let (mut s, _) = session(boot());
        s.begin_case("slow", Continuity::Reset, None).unwrap();
        s.expect("Never here").unwrap();
        let err = s.tick(0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.message.contains("no record received"));
        s.abort_case(&err);
        assert_eq!(s.state(), SessionState::AwaitingReset);
    }

    #[test]
    fn test_missing_done_fails_end_of_case() {
        let mut replies = boot();
        replies.push(vec![ack("Trg-Ack QS_RX_TICK")]);
        let (mut s, _) = session(replies);
        s.begin_case("undone", Continuity::Reset, None).unwrap();
        s.tick(0).unwrap();
        let err = s.end_case(None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::QueueNotDrained);
        assert!(err.message.contains("Trg-Done QS_RX_TICK"));
    }

    #[test]
    fn test_handle_relative_commands_need_current_object() {
        let (mut s, _) = session(boot());
        s.begin_case("nohandle", Continuity::Reset, None).unwrap();
        let err = s.dispatch("EAT_SIG", Bytes::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Usage);
        assert!(err.message.contains("current SM object"));
        assert_eq!(s.poke(0, 1, vec![1]).unwrap_err().kind, ErrorKind::Usage);
    }

    #[test]
    fn test_custom_reset_hook() {
        let replies = vec![
            vec![
                (rec::TARGET_INFO, None, "Trg-Info QP-Ver=720"),
                (rec::TEST_PAUSED, None, "TstPause"),
            ],
            vec![ack("Trg-Ack QS_RX_GLB_FILTER")],
            vec![ack("Trg-Ack QS_RX_TEST_CONTINUE")],
        ];
        let (mut s, sent) = session(replies);
        let hook = |s: &mut Session| -> Result<(), HarnessError> {
            s.expect_pause();
            s.glb_filter(&["SM"])?;
            s.continue_test()
        };
        s.reset(Some(&hook)).unwrap();
        assert!(s.filters().is_enabled(1));
        assert_eq!(*sent.lock().unwrap(), vec![2, 10, 14]);
    }

    #[test]
    fn test_assertion_ends_run_and_parks_target() {
        let mut replies = boot();
        replies.extend([
            vec![ack("Trg-Ack QS_RX_CURR_OBJ")],
            vec![
                ack("Trg-Ack QS_RX_EVENT"),
                (6, Some(10), "Disp===> Obj=AO_Philo,Sig=TIMEOUT_SIG"),
                (rec::ASSERT_FAIL, Some(11), "=ASSERT= Mod=qf_actq,Loc=110"),
            ],
        ]);
        let (mut s, sent) = session(replies);
        s.begin_case("asserts", Continuity::Reset, None).unwrap();
        s.current_obj(ObjKind::SmAo, "AO_Philo").unwrap();
        s.dispatch("EAT_SIG", Bytes::new()).unwrap();
        s.expect("@timestamp Disp===> Obj=AO_Philo,Sig=TIMEOUT_SIG").unwrap();
        s.expect("@timestamp =ASSERT= Mod=qf_actq,Loc=110").unwrap();
        s.end_case(None).unwrap();
        assert_eq!(s.state(), SessionState::AwaitingReset);
        // no teardown is sent to an asserted target
        assert_eq!(*sent.lock().unwrap(), vec![2, 14, 7, 13, 16]);
        assert!(s.begin_case("after", Continuity::Continue, None).is_err());
    }

    #[test]
    fn test_memory_values_must_fit_item_size() {
        let mut replies = boot();
        replies.push(vec![ack("Trg-Ack QS_RX_CURR_OBJ")]);
        let (mut s, sent) = session(replies);
        s.begin_case("poke", Continuity::Reset, None).unwrap();
        s.current_obj(ObjKind::Ap, "AO_Philo").unwrap();

        let err = s.poke(0, 1, vec![0x7F, 0x1FF]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Usage);
        assert!(err.message.contains("0x1FF does not fit in 1 byte"));
        let err = s.fill(0, 2, 1, 0x1_2345).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Usage);
        assert!(err.message.contains("fill"));
        assert_eq!(*sent.lock().unwrap(), vec![2, 14, 7, 13]);
    }

    #[test]
    fn test_oversized_event_parameters_rejected() {
        let (mut s, sent) = session(boot());
        s.begin_case("big", Continuity::Reset, None).unwrap();
        let err = s.publish("EAT_SIG", Bytes::from(vec![0; 65536])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Usage);
        assert!(err.message.contains("65536 bytes"));
        assert_eq!(*sent.lock().unwrap(), vec![2, 14, 7]);
    }

    #[test]
    fn test_close_runs_shutdown_action_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (mut s, _) = session(Vec::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        s.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        s.close();
        assert_eq!(s.state(), SessionState::Closed);
        drop(s);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (mut s, _) = session(Vec::new());
        let counter = calls.clone();
        s.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(s);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_done_pattern_shape() {
        assert_eq!(done_pattern("QS_RX_TICK").to_string(), "@timestamp Trg-Done QS_RX_TICK");
    }
}
