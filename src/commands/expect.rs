//! expect / expect_pause / expect_run - queue expectations

use crate::engine::{Cmd, CmdResult, CmdUsage};
use crate::error::HarnessError;
use crate::session::Session;

// ──────────────────────────────────────────────────────────
// expect - queue a record pattern
// ──────────────────────────────────────────────────────────

pub(super) struct ExpectCmd;

impl Cmd for ExpectCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        // a quoted pattern and a bare word list read the same
        let pattern = args.join(" ");
        if pattern.trim().is_empty() {
            return Err(HarnessError::usage("expect", "pattern..."));
        }
        session.expect(&pattern)?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Expect the next record to match pattern (* any token, @timestamp)".into(),
            args: "pattern...".into(),
        }
    }
}

// ──────────────────────────────────────────────────────────
// expect_pause - the target stops at a test pause point
// ──────────────────────────────────────────────────────────

pub(super) struct ExpectPauseCmd;

impl Cmd for ExpectPauseCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        if !args.is_empty() {
            return Err(HarnessError::usage("expect_pause", ""));
        }
        session.expect_pause();
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Expect the target to pause".into(),
            args: "".into(),
        }
    }
}

// ──────────────────────────────────────────────────────────
// expect_run - the target enters its event loop
// ──────────────────────────────────────────────────────────

pub(super) struct ExpectRunCmd;

impl Cmd for ExpectRunCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        if !args.is_empty() {
            return Err(HarnessError::usage("expect_run", ""));
        }
        session.expect_run();
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Expect the target to start running its event loop".into(),
            args: "".into(),
        }
    }
}
