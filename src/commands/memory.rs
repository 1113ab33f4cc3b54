//! poke / fill / peek - access the current application object's memory

use super::num;
use crate::engine::{Cmd, CmdResult, CmdUsage};
use crate::error::HarnessError;
use crate::session::Session;

// ──────────────────────────────────────────────────────────
// poke - write consecutive items
// ──────────────────────────────────────────────────────────

pub(super) struct PokeCmd;

impl Cmd for PokeCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        let [offset, size, values @ ..] = args else {
            return Err(HarnessError::usage("poke", "offset size value..."));
        };
        if values.is_empty() {
            return Err(HarnessError::usage("poke", "offset size value..."));
        }
        let offset = num("poke", "offset", offset)?;
        let size = num("poke", "size", size)?;
        let data = values
            .iter()
            .map(|v| num("poke", "value", v))
            .collect::<Result<Vec<u32>, _>>()?;
        session.poke(offset, size, data)?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Write items of 1, 2 or 4 bytes at offset into the current AP object".into(),
            args: "offset size value...".into(),
        }
    }
}

// ──────────────────────────────────────────────────────────
// fill - repeat one value
// ──────────────────────────────────────────────────────────

pub(super) struct FillCmd;

impl Cmd for FillCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        let [offset, size, count, value] = args else {
            return Err(HarnessError::usage("fill", "offset size num value"));
        };
        session.fill(
            num("fill", "offset", offset)?,
            num("fill", "size", size)?,
            num("fill", "count", count)?,
            num("fill", "value", value)?,
        )?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Fill num items at offset of the current AP object with value".into(),
            args: "offset size num value".into(),
        }
    }
}

// ──────────────────────────────────────────────────────────
// peek - request a memory dump
// ──────────────────────────────────────────────────────────

pub(super) struct PeekCmd;

impl Cmd for PeekCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        let [offset, size, count] = args else {
            return Err(HarnessError::usage("peek", "offset size num"));
        };
        session.peek(
            num("peek", "offset", offset)?,
            num("peek", "size", size)?,
            num("peek", "count", count)?,
        )?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Read num items at offset of the current AP object (answered by a peek record)".into(),
            args: "offset size num".into(),
        }
    }
}
