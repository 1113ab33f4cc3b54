//! Command channel
//!
//! Encodes harness commands into target frames and writes them in issue
//! order. The channel also owns the run-to-completion bookkeeping: once a
//! command that makes the target run has been sent, nothing else may be sent
//! until the run has been observed to finish.

use std::fmt;
use std::io::Write;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::HarnessError;
use crate::filter::ObjKind;
use crate::frame::encode_frame;

/// Event routing priorities with special meaning.
pub mod prio {
    pub const PUBLISH: u8 = 0;
    pub const MAX_ACTIVE: u8 = 64;
    pub const POST_CURRENT: u8 = 253;
    pub const INIT_CURRENT: u8 = 254;
    pub const DISPATCH_CURRENT: u8 = 255;
}

/// Field widths of the target build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetLayout {
    pub obj_ptr_size: u8,
    pub fun_ptr_size: u8,
    pub sig_size: u8,
}

impl Default for TargetLayout {
    fn default() -> Self {
        Self {
            obj_ptr_size: 4,
            fun_ptr_size: 4,
            sig_size: 2,
        }
    }
}

/// Commands the target understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Info,
    Command { id: u8, params: [u32; 3] },
    Reset,
    Tick { rate: u8 },
    Peek { offset: u16, size: u8, num: u8 },
    Poke { offset: u16, size: u8, data: Vec<u32> },
    Fill { offset: u16, size: u8, num: u8, value: u32 },
    TestSetup,
    TestTeardown,
    TestProbe { data: u32, addr: u64 },
    GlbFilter { mask: [u8; 16] },
    LocFilter { kind: ObjKind, addr: u64 },
    AoFilter { prio: u8 },
    CurrObj { kind: ObjKind, addr: u64 },
    TestContinue,
    QueryCurr { kind: ObjKind },
    Event { prio: u8, sig: u64, params: Bytes },
}

impl Command {
    /// Receive-channel record number.
    pub fn id(&self) -> u8 {
        match self {
            Command::Info => 0,
            Command::Command { .. } => 1,
            Command::Reset => 2,
            Command::Tick { .. } => 3,
            Command::Peek { .. } => 4,
            Command::Poke { .. } => 5,
            Command::Fill { .. } => 6,
            Command::TestSetup => 7,
            Command::TestTeardown => 8,
            Command::TestProbe { .. } => 9,
            Command::GlbFilter { .. } => 10,
            Command::LocFilter { .. } => 11,
            Command::AoFilter { .. } => 12,
            Command::CurrObj { .. } => 13,
            Command::TestContinue => 14,
            Command::QueryCurr { .. } => 15,
            Command::Event { .. } => 16,
        }
    }

    /// Name the target uses when acknowledging the command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Info => "QS_RX_INFO",
            Command::Command { .. } => "QS_RX_COMMAND",
            Command::Reset => "QS_RX_RESET",
            Command::Tick { .. } => "QS_RX_TICK",
            Command::Peek { .. } => "QS_RX_PEEK",
            Command::Poke { .. } => "QS_RX_POKE",
            Command::Fill { .. } => "QS_RX_FILL",
            Command::TestSetup => "QS_RX_TEST_SETUP",
            Command::TestTeardown => "QS_RX_TEST_TEARDOWN",
            Command::TestProbe { .. } => "QS_RX_TEST_PROBE",
            Command::GlbFilter { .. } => "QS_RX_GLB_FILTER",
            Command::LocFilter { .. } => "QS_RX_LOC_FILTER",
            Command::AoFilter { .. } => "QS_RX_AO_FILTER",
            Command::CurrObj { .. } => "QS_RX_CURR_OBJ",
            Command::TestContinue => "QS_RX_TEST_CONTINUE",
            Command::QueryCurr { .. } => "QS_RX_QUERY_CURR",
            Command::Event { .. } => "QS_RX_EVENT",
        }
    }

    /// Commands after which the target runs to completion and reports
    /// `Trg-Done` (or `Trg-ERR`).
    pub fn triggers_run(&self) -> bool {
        matches!(
            self,
            Command::Command { .. } | Command::Tick { .. } | Command::Event { .. }
        )
    }

    /// Record bytes of the command: id followed by its little-endian payload.
    pub fn encode(&self, layout: &TargetLayout) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u8(self.id());
        match self {
            Command::Info
            | Command::Reset
            | Command::TestSetup
            | Command::TestTeardown
            | Command::TestContinue => {}
            Command::Command { id, params } => {
                buf.put_u8(*id);
                for p in params {
                    buf.put_u32_le(*p);
                }
            }
            Command::Tick { rate } => buf.put_u8(*rate),
            Command::Peek { offset, size, num } => {
                buf.put_u16_le(*offset);
                buf.put_u8(*size);
                buf.put_u8(*num);
            }
            Command::Poke { offset, size, data } => {
                buf.put_u16_le(*offset);
                buf.put_u8(*size);
                buf.put_u8(data.len() as u8);
                for value in data {
                    buf.put_uint_le(u64::from(*value), usize::from(*size));
                }
            }
            Command::Fill { offset, size, num, value } => {
                buf.put_u16_le(*offset);
                buf.put_u8(*size);
                buf.put_u8(*num);
                buf.put_uint_le(u64::from(*value), usize::from(*size));
            }
            Command::TestProbe { data, addr } => {
                buf.put_u32_le(*data);
                buf.put_uint_le(*addr, usize::from(layout.fun_ptr_size));
            }
            Command::GlbFilter { mask } => {
                buf.put_u8(mask.len() as u8);
                buf.put_slice(mask);
            }
            Command::LocFilter { kind, addr } | Command::CurrObj { kind, addr } => {
                buf.put_u8(kind.code());
                buf.put_uint_le(*addr, usize::from(layout.obj_ptr_size));
            }
            Command::AoFilter { prio } => buf.put_u8(*prio),
            Command::QueryCurr { kind } => buf.put_u8(kind.code()),
            Command::Event { prio, sig, params } => {
                buf.put_u8(*prio);
                buf.put_uint_le(*sig, usize::from(layout.sig_size));
                buf.put_u16_le(params.len() as u16);
                buf.put_slice(params);
            }
        }
        buf.freeze()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outgoing half of the session: framing, sequencing and run tracking.
pub struct CommandChannel<W> {
    writer: W,
    layout: TargetLayout,
    seq: u8,
    outstanding: Option<&'static str>,
}

impl<W: Write> CommandChannel<W> {
    pub fn new(writer: W, layout: TargetLayout) -> Self {
        Self {
            writer,
            layout,
            seq: 0,
            outstanding: None,
        }
    }

    pub fn layout(&self) -> &TargetLayout {
        &self.layout
    }

    /// Name of the command whose run has not been seen to complete yet.
    pub fn outstanding_run(&self) -> Option<&'static str> {
        self.outstanding
    }

    /// Frame and write one command, then flush.
    pub fn send(&mut self, cmd: &Command) -> Result<(), HarnessError> {
        if let Some(running) = self.outstanding {
            if *cmd != Command::Reset {
                return Err(HarnessError::protocol(format!(
                    "cannot send {} while {} is still running on the target",
                    cmd, running
                )));
            }
        }
        if *cmd == Command::Reset {
            self.outstanding = None;
        }

        self.seq = self.seq.wrapping_add(1);
        let frame = encode_frame(self.seq, &cmd.encode(&self.layout));
        self.writer.write_all(&frame)?;
        self.writer.flush()?;
        tracing::debug!(seq = self.seq, bytes = frame.len(), "sent {}", cmd);

        if cmd.triggers_run() {
            self.outstanding = Some(cmd.name());
        }
        Ok(())
    }

    /// The target reported the end of the outstanding run.
    pub fn complete_run(&mut self) {
        if let Some(name) = self.outstanding.take() {
            tracing::trace!("run of {} complete", name);
        }
    }

    /// The target restarted: its receive counter is back at zero.
    pub fn reset_sequence(&mut self) {
        self.seq = 0;
        self.outstanding = None;
    }
}
