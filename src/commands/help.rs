//! help - display command help

use crate::engine::{Cmd, CmdResult, CmdUsage};
use crate::error::HarnessError;
use crate::session::Session;

pub struct HelpCmd {
    /// (name, args, summary) for each command
    cmd_info: Vec<(String, String, String)>,
}

impl HelpCmd {
    pub fn new(cmd_info: Vec<(String, String, String)>) -> Self {
        Self { cmd_info }
    }

    /// Help text for `names`, or for every command when empty.
    pub fn render(&self, names: &[String]) -> String {
        let mut output = String::new();
        let entry = |output: &mut String, name: &str, args: &str, summary: &str| {
            if args.is_empty() {
                output.push_str(&format!("{}\n    {}\n", name, summary));
            } else {
                output.push_str(&format!("{} {}\n    {}\n", name, args, summary));
            }
        };

        if names.is_empty() {
            for (name, args, summary) in &self.cmd_info {
                entry(&mut output, name, args, summary);
            }
        } else {
            for name in names {
                match self.cmd_info.iter().find(|(n, _, _)| n == name) {
                    Some((_, args, summary)) => entry(&mut output, name, args, summary),
                    None => output.push_str(&format!("{}: unknown command\n", name)),
                }
            }
        }
        output
    }
}

impl Cmd for HelpCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        let output = self.render(args);
        session.logf(&format!("[help]\n{}", output));
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Display help for commands".into(),
            args: "[command...]".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn help() -> HelpCmd {
        HelpCmd::new(vec![
            ("expect_pause".into(), "".into(), "Expect the target to pause".into()),
            ("tick".into(), "[rate]".into(), "Advance the clock tick".into()),
        ])
    }

    #[test]
    fn test_render_all() {
        assert_eq!(
            help().render(&[]),
            "expect_pause\n    Expect the target to pause\ntick [rate]\n    Advance the clock tick\n"
        );
    }

    #[test]
    fn test_render_selected_and_unknown() {
        let text = help().render(&["tick".into(), "exec".into()]);
        assert_eq!(text, "tick [rate]\n    Advance the clock tick\nexec: unknown command\n");
    }
}
