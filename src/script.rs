//! Script loading
//!
//! A `.tspec` script is a flat list of sections. A header line opens a
//! section and every following command line belongs to it:
//!
//! ```text
//! # runs after each reset instead of the default pause/continue
//! on_reset
//! expect_pause
//! glb_filter SM AO
//! current_obj SM AO_Philo
//! continue_test
//!
//! test 'philo eats'
//! post EAT_SIG u8:2
//! expect '@timestamp AO-Post Sdr=QS_RX,Obj=AO_Philo *'
//! expect '@timestamp Trg-Done QS_RX_EVENT'
//!
//! test 'philo keeps eating' noreset
//! tick
//! expect '@timestamp Trg-Done QS_RX_TICK'
//! ```
//!
//! Commands are checked against the engine when the script is loaded, so a
//! typo fails the whole suite up front instead of halfway through a run.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{ErrorKind, HarnessError};
use crate::parser::parse_line;
use crate::runner::{Suite, TestCase};
use crate::session::{Hook, Session};

type Lines = Vec<(usize, String)>;

enum Section {
    OnReset,
    OnSetup,
    OnTeardown,
    Test { name: String, noreset: bool },
}

/// Read and load the script at `path`.
pub fn load_suite(engine: &Arc<Engine>, path: &Path) -> Result<Suite, HarnessError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        HarnessError::new(ErrorKind::Io, format!("reading {}: {}", path.display(), e))
    })?;
    let mut suite = parse_suite(engine, &text, &path.display().to_string())?;
    if let Some(stem) = path.file_stem() {
        suite.name = stem.to_string_lossy().into_owned();
    }
    suite.file = Some(path.to_path_buf());
    Ok(suite)
}

/// Build a suite from script text; `filename` is used in error locations.
pub fn parse_suite(engine: &Arc<Engine>, text: &str, filename: &str) -> Result<Suite, HarnessError> {
    let mut sections: Vec<(Section, usize, Lines)> = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line_number = idx + 1;
        let at = |e: HarnessError| e.with_location(filename, line_number);

        let parsed = match parse_line(line, line_number) {
            Ok(Some(p)) => p,
            Ok(None) => {
                // keep section comments for the transcript
                if line.starts_with('#') {
                    if let Some((_, _, lines)) = sections.last_mut() {
                        lines.push((line_number, line.to_string()));
                    }
                }
                continue;
            }
            Err(e) => return Err(at(HarnessError::syntax(e.message))),
        };

        let header = match parsed.command.as_str() {
            "on_reset" | "on_setup" | "on_teardown" if !parsed.raw_args.is_empty() => {
                return Err(at(HarnessError::syntax(format!(
                    "{} takes no arguments",
                    parsed.command
                ))));
            }
            "on_reset" => Some(Section::OnReset),
            "on_setup" => Some(Section::OnSetup),
            "on_teardown" => Some(Section::OnTeardown),
            "test" => {
                let args = parsed.literal_args();
                match args.as_slice() {
                    [name] => Some(Section::Test { name: name.clone(), noreset: false }),
                    [name, flag] if flag == "noreset" => {
                        Some(Section::Test { name: name.clone(), noreset: true })
                    }
                    _ => return Err(at(HarnessError::syntax("usage: test NAME [noreset]"))),
                }
            }
            _ => None,
        };

        match header {
            Some(section) => sections.push((section, line_number, Vec::new())),
            None => {
                if !engine.has_command(&parsed.command) {
                    return Err(at(HarnessError::syntax(format!(
                        "unknown command: {}",
                        parsed.command
                    ))));
                }
                let Some((_, _, lines)) = sections.last_mut() else {
                    return Err(at(HarnessError::syntax(format!(
                        "{} outside of a test or hook section",
                        parsed.command
                    ))));
                };
                lines.push((line_number, line.to_string()));
            }
        }
    }

    let mut suite = Suite::new(filename);
    let mut names = HashSet::new();
    for (section, line_number, lines) in sections {
        let duplicate = |what: &str| {
            HarnessError::syntax(format!("duplicate {}", what)).with_location(filename, line_number)
        };
        match section {
            Section::OnReset => {
                if suite.hooks.on_reset.is_some() {
                    return Err(duplicate("on_reset"));
                }
                suite.hooks.on_reset = Some(hook(engine, lines, filename));
            }
            Section::OnSetup => {
                if suite.hooks.on_setup.is_some() {
                    return Err(duplicate("on_setup"));
                }
                suite.hooks.on_setup = Some(hook(engine, lines, filename));
            }
            Section::OnTeardown => {
                if suite.hooks.on_teardown.is_some() {
                    return Err(duplicate("on_teardown"));
                }
                suite.hooks.on_teardown = Some(hook(engine, lines, filename));
            }
            Section::Test { name, noreset } => {
                if !names.insert(name.clone()) {
                    return Err(duplicate(&format!("test name {:?}", name)));
                }
                let case = TestCase::new(name, body(engine, lines, filename));
                suite.cases.push(if noreset { case.no_reset() } else { case });
            }
        }
    }

    tracing::debug!(
        file = filename,
        cases = suite.cases.len(),
        "script loaded"
    );
    Ok(suite)
}

fn body(
    engine: &Arc<Engine>,
    lines: Lines,
    filename: &str,
) -> impl Fn(&mut Session) -> Result<(), HarnessError> + 'static {
    let engine = Arc::clone(engine);
    let filename = filename.to_string();
    move |session: &mut Session| engine.execute(session, &lines, &filename)
}

fn hook(engine: &Arc<Engine>, lines: Lines, filename: &str) -> Box<Hook> {
    Box::new(body(engine, lines, filename))
}
