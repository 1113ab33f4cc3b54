//! Script engine
//!
//! The Engine holds the command registry and the script variables. It is
//! stateless config: one engine can run many sections against many sessions.

use std::collections::HashMap;

use crate::error::HarnessError;
use crate::parser::ArgFragment;
use crate::session::Session;

/// Result returned by a command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmdResult {
    /// Command completed successfully
    Ok,
    /// Command completed, test should be skipped
    Skip(String),
}

/// Usage information for a command
pub struct CmdUsage {
    /// One-line summary
    pub summary: String,
    /// Argument syntax
    pub args: String,
}

/// A command that can be executed in a script
pub trait Cmd: Send + Sync {
    /// Execute the command
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError>;

    /// Return usage information
    fn usage(&self) -> CmdUsage;
}

/// A boxed command
pub type BoxedCmd = Box<dyn Cmd>;

/// The script engine
pub struct Engine {
    /// Registered commands
    pub commands: HashMap<String, BoxedCmd>,
    /// Variables set from the command line; the process environment is
    /// consulted for anything not set here
    vars: HashMap<String, String>,
    /// Whether to suppress command logging
    pub quiet: bool,
}

impl Engine {
    /// Create a new engine with the default commands
    pub fn new() -> Self {
        let mut commands = crate::commands::default_commands();

        // help needs to know every other command, so it goes in last
        let mut cmd_help: Vec<(String, String, String)> = commands
            .iter()
            .map(|(name, cmd)| {
                let u = cmd.usage();
                (name.clone(), u.args, u.summary)
            })
            .collect();
        cmd_help.push((
            "help".into(),
            "[command...]".into(),
            "Display help for commands".into(),
        ));
        cmd_help.sort_by(|a, b| a.0.cmp(&b.0));

        commands.insert("help".into(), Box::new(crate::commands::HelpCmd::new(cmd_help)));

        Self {
            commands,
            vars: HashMap::new(),
            quiet: false,
        }
    }

    /// Register a custom command
    pub fn register_command(&mut self, name: impl Into<String>, cmd: BoxedCmd) {
        self.commands.insert(name.into(), cmd);
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }

    /// Whether `name` is a registered command.
    pub fn has_command(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Execute script lines (with their 1-based line numbers) against a
    /// session.
    pub fn execute(
        &self,
        session: &mut Session,
        lines: &[(usize, String)],
        filename: &str,
    ) -> Result<(), HarnessError> {
        for (line_number, line) in lines {
            let line_number = *line_number;

            // only lines where '#' is the very first character are section
            // comments; they end up in the transcript
            if line.starts_with('#') {
                if !self.quiet {
                    session.logf(line.trim());
                }
                continue;
            }

            let parsed = match crate::parser::parse_line(line, line_number) {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    return Err(HarnessError::syntax(e.message).with_location(filename, line_number));
                }
            };

            if !self.quiet {
                session.logf(&format!("> {}", parsed.raw.trim()));
            }

            let cmd = self.commands.get(&parsed.command).ok_or_else(|| {
                HarnessError::syntax(format!("unknown command: {}", parsed.command))
                    .with_location(filename, line_number)
            })?;

            let expanded_args = self.expand_args(&parsed.raw_args);
            tracing::trace!(line = line_number, "{} {:?}", parsed.command, expanded_args);

            match cmd.run(session, &expanded_args) {
                Ok(CmdResult::Ok) => {}
                Ok(CmdResult::Skip(msg)) => {
                    return Err(HarnessError::skip(msg).with_location(filename, line_number));
                }
                Err(e) => {
                    return Err(e
                        .with_location(filename, line_number)
                        .with_command(&parsed.command)
                        .with_args(expanded_args));
                }
            }
        }

        Ok(())
    }

    /// Expand arguments from raw fragments: quoted fragments are emitted
    /// verbatim, unquoted ones have variables expanded.
    pub fn expand_args(&self, raw_args: &[Vec<ArgFragment>]) -> Vec<String> {
        let lookup = |key: &str| self.var(key);
        raw_args
            .iter()
            .map(|frags| {
                let mut buf = String::new();
                for frag in frags {
                    if frag.quoted {
                        buf.push_str(&frag.s);
                    } else {
                        buf.push_str(&crate::parser::expand_vars(&frag.s, &lookup));
                    }
                }
                buf
            })
            .collect()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
