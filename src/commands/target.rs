//! Target control commands: continue_test, filters, current objects,
//! clock ticks, application commands and test probes

use super::{num, obj_kind};
use crate::engine::{Cmd, CmdResult, CmdUsage};
use crate::error::HarnessError;
use crate::session::Session;

// ──────────────────────────────────────────────────────────
// continue_test - release a paused target
// ──────────────────────────────────────────────────────────

pub(super) struct ContinueCmd;

impl Cmd for ContinueCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        if !args.is_empty() {
            return Err(HarnessError::usage("continue_test", ""));
        }
        session.continue_test()?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Let a paused target continue".into(),
            args: "".into(),
        }
    }
}

// ──────────────────────────────────────────────────────────
// glb_filter - enable/disable record groups
// ──────────────────────────────────────────────────────────

pub(super) struct GlbFilterCmd;

impl Cmd for GlbFilterCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        if args.is_empty() {
            return Err(HarnessError::usage("glb_filter", "[-]group|record..."));
        }
        session.glb_filter(args)?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Set the global record filter (ALL SM AO EQ MP TE QF SC U0..U4 UA, or numbers)".into(),
            args: "[-]group|record...".into(),
        }
    }
}

// ──────────────────────────────────────────────────────────
// loc_filter - restrict output to objects
// ──────────────────────────────────────────────────────────

pub(super) struct LocFilterCmd;

impl Cmd for LocFilterCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        let [kind, ids @ ..] = args else {
            return Err(HarnessError::usage("loc_filter", "kind object..."));
        };
        if ids.is_empty() {
            return Err(HarnessError::usage("loc_filter", "kind object..."));
        }
        let kind = obj_kind("loc_filter", kind)?;
        session.loc_filter(kind, ids)?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Set the local filter to the given objects".into(),
            args: "kind object...".into(),
        }
    }
}

// ──────────────────────────────────────────────────────────
// ao_filter - filter by active object priority
// ──────────────────────────────────────────────────────────

pub(super) struct AoFilterCmd;

impl Cmd for AoFilterCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        if args.len() != 1 {
            return Err(HarnessError::usage("ao_filter", "prio"));
        }
        let prio = num("ao_filter", "priority", &args[0])?;
        session.ao_filter(prio)?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Set the local filter to the active object of a priority (0 clears)".into(),
            args: "prio".into(),
        }
    }
}

// ──────────────────────────────────────────────────────────
// current_obj - select the object later commands address
// ──────────────────────────────────────────────────────────

pub(super) struct CurrentObjCmd;

impl Cmd for CurrentObjCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        let [kind, name] = args else {
            return Err(HarnessError::usage("current_obj", "kind object"));
        };
        let kind = obj_kind("current_obj", kind)?;
        session.current_obj(kind, name)?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Select the current object of a kind".into(),
            args: "kind object".into(),
        }
    }
}

// ──────────────────────────────────────────────────────────
// query_curr - ask the target about a current object
// ──────────────────────────────────────────────────────────

pub(super) struct QueryCurrCmd;

impl Cmd for QueryCurrCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        if args.len() != 1 {
            return Err(HarnessError::usage("query_curr", "kind"));
        }
        let kind = obj_kind("query_curr", &args[0])?;
        session.query_curr(kind)?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Query the current object of a kind (answered by a query record)".into(),
            args: "kind".into(),
        }
    }
}

// ──────────────────────────────────────────────────────────
// tick - advance the target clock
// ──────────────────────────────────────────────────────────

pub(super) struct TickCmd;

impl Cmd for TickCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        let rate = match args {
            [] => 0,
            [rate] => num("tick", "rate", rate)?,
            _ => return Err(HarnessError::usage("tick", "[rate]")),
        };
        session.tick(rate)?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Advance the clock tick of the given rate".into(),
            args: "[rate]".into(),
        }
    }
}

// ──────────────────────────────────────────────────────────
// command - run an application-specific command
// ──────────────────────────────────────────────────────────

pub(super) struct CommandCmd;

impl Cmd for CommandCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        if args.is_empty() || args.len() > 4 {
            return Err(HarnessError::usage("command", "id [p1 [p2 [p3]]]"));
        }
        let id = num("command", "id", &args[0])?;
        let mut params = [0u32; 3];
        for (slot, arg) in params.iter_mut().zip(&args[1..]) {
            *slot = num("command", "parameter", arg)?;
        }
        session.command(id, params)?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Run the target's command handler".into(),
            args: "id [p1 [p2 [p3]]]".into(),
        }
    }
}

// ──────────────────────────────────────────────────────────
// probe - arm a test probe
// ──────────────────────────────────────────────────────────

pub(super) struct ProbeCmd;

impl Cmd for ProbeCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        let [function, value] = args else {
            return Err(HarnessError::usage("probe", "function value"));
        };
        let value = num("probe", "value", value)?;
        session.probe(function, value)?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Arm a test probe for a target function".into(),
            args: "function value".into(),
        }
    }
}
