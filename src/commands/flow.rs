//! skip - skip the rest of the test

use crate::engine::{Cmd, CmdResult, CmdUsage};
use crate::error::HarnessError;
use crate::session::Session;

pub(super) struct SkipCmd;

impl Cmd for SkipCmd {
    fn run(&self, _session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        let msg = if args.is_empty() {
            "skipped".to_string()
        } else {
            args.join(" ")
        };
        Ok(CmdResult::Skip(msg))
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Skip the test".into(),
            args: "[reason]".into(),
        }
    }
}
