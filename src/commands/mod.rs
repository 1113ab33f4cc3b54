//! Built-in script commands
//!
//! Each command maps onto one session primitive. Numeric arguments accept
//! decimal or `0x` hex; symbolic names are resolved through the target's
//! dictionaries by the session.

mod events;
mod expect;
mod flow;
mod help;
mod memory;
mod target;

use std::collections::HashMap;

use crate::dictionary::parse_number;
use crate::engine::BoxedCmd;
use crate::error::{ErrorKind, HarnessError};
use crate::filter::ObjKind;

pub use events::parse_event_params;
pub use help::HelpCmd;

/// Return the default set of built-in commands
pub fn default_commands() -> HashMap<String, BoxedCmd> {
    let mut cmds: HashMap<String, BoxedCmd> = HashMap::new();
    cmds.insert("expect".into(), Box::new(expect::ExpectCmd));
    cmds.insert("expect_pause".into(), Box::new(expect::ExpectPauseCmd));
    cmds.insert("expect_run".into(), Box::new(expect::ExpectRunCmd));
    cmds.insert("continue_test".into(), Box::new(target::ContinueCmd));
    cmds.insert("glb_filter".into(), Box::new(target::GlbFilterCmd));
    cmds.insert("loc_filter".into(), Box::new(target::LocFilterCmd));
    cmds.insert("ao_filter".into(), Box::new(target::AoFilterCmd));
    cmds.insert("current_obj".into(), Box::new(target::CurrentObjCmd));
    cmds.insert("query_curr".into(), Box::new(target::QueryCurrCmd));
    cmds.insert("tick".into(), Box::new(target::TickCmd));
    cmds.insert("command".into(), Box::new(target::CommandCmd));
    cmds.insert("probe".into(), Box::new(target::ProbeCmd));
    cmds.insert("post".into(), Box::new(events::PostCmd));
    cmds.insert("publish".into(), Box::new(events::PublishCmd));
    cmds.insert("dispatch".into(), Box::new(events::DispatchCmd));
    cmds.insert("init".into(), Box::new(events::InitCmd));
    cmds.insert("poke".into(), Box::new(memory::PokeCmd));
    cmds.insert("fill".into(), Box::new(memory::FillCmd));
    cmds.insert("peek".into(), Box::new(memory::PeekCmd));
    cmds.insert("skip".into(), Box::new(flow::SkipCmd));
    cmds
}

/// Parse a numeric argument that must fit in `T`.
fn num<T: TryFrom<u64>>(cmd: &str, what: &str, arg: &str) -> Result<T, HarnessError> {
    parse_number(arg)
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| {
            HarnessError::new(
                ErrorKind::Usage,
                format!("{}: invalid {} {:?}", cmd, what, arg),
            )
        })
}

fn obj_kind(cmd: &str, arg: &str) -> Result<ObjKind, HarnessError> {
    ObjKind::parse(arg).ok_or_else(|| {
        HarnessError::new(
            ErrorKind::Usage,
            format!("{}: unknown object kind {:?} (SM, AO, MP, EQ, TE, AP, SM_AO)", cmd, arg),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_ranges() {
        assert_eq!(num::<u8>("tick", "rate", "3").unwrap(), 3);
        assert_eq!(num::<u16>("poke", "offset", "0x10").unwrap(), 16);
        let err = num::<u8>("tick", "rate", "256").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Usage);
        assert!(err.message.contains("invalid rate"));
        assert!(num::<u32>("command", "parameter", "ten").is_err());
    }

    #[test]
    fn test_obj_kind_names() {
        assert_eq!(obj_kind("current_obj", "SM_AO").unwrap(), ObjKind::SmAo);
        assert!(obj_kind("current_obj", "QQ").unwrap_err().message.contains("SM_AO"));
    }
}
