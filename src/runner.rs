//! Test runner
//!
//! Runs the ordered test cases of a suite against one live session and
//! aggregates their outcomes.

use std::fmt;
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::engine::Engine;
use crate::error::HarnessError;
use crate::session::{Continuity, Hook, Session, SessionConfig, SessionState};

/// Body of a test case.
pub type CaseBody = Box<dyn Fn(&mut Session) -> Result<(), HarnessError>>;

pub struct TestCase {
    pub name: String,
    pub continuity: Continuity,
    pub body: CaseBody,
}

impl TestCase {
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&mut Session) -> Result<(), HarnessError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            continuity: Continuity::Reset,
            body: Box::new(body),
        }
    }

    /// Continue from the state the previous case left the target in.
    pub fn no_reset(mut self) -> Self {
        self.continuity = Continuity::Continue;
        self
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("continuity", &self.continuity)
            .finish_non_exhaustive()
    }
}

/// Suite-wide hooks
#[derive(Default)]
pub struct Hooks {
    /// Runs after every target reset, replacing the default pause/continue
    pub on_reset: Option<Box<Hook>>,
    /// Runs at the start of every case, after the target acknowledged setup
    pub on_setup: Option<Box<Hook>>,
    /// Runs at the end of every case, after the target acknowledged teardown
    pub on_teardown: Option<Box<Hook>>,
}

/// An ordered list of test cases sharing hooks.
#[derive(Default)]
pub struct Suite {
    pub name: String,
    pub file: Option<PathBuf>,
    pub hooks: Hooks,
    pub cases: Vec<TestCase>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn case(mut self, case: TestCase) -> Self {
        self.cases.push(case);
        self
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_reset", &self.on_reset.is_some())
            .field("on_setup", &self.on_setup.is_some())
            .field("on_teardown", &self.on_teardown.is_some())
            .finish()
    }
}

impl fmt::Debug for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("hooks", &self.hooks)
            .field("cases", &self.cases)
            .finish()
    }
}

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Only run cases whose name matches
    pub filter: Option<Regex>,
    /// Keep the transcript of passing cases too
    pub verbose: bool,
    /// Skip everything after the first failing case
    pub stop_on_first_failure: bool,
    /// Per-record wait used for sessions opened by the runner
    pub timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            filter: None,
            verbose: false,
            stop_on_first_failure: false,
            timeout: SessionConfig::default().timeout,
        }
    }
}

impl RunConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            timeout: self.timeout,
            verbose: self.verbose,
            ..SessionConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    /// The case did not behave as declared
    Failed(String),
    /// The run itself broke down (decode, protocol or connection error)
    Error(String),
    Skipped(String),
}

/// Result of a single test case
#[derive(Debug)]
pub struct TestCaseResult {
    pub name: String,
    pub suite: String,
    pub outcome: Outcome,
    /// Session transcript
    pub log: String,
    pub duration: Duration,
}

impl TestCaseResult {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// Result of running all tests
#[derive(Debug, Default)]
pub struct TestResult {
    pub cases: Vec<TestCaseResult>,
    pub duration: Duration,
}

impl TestResult {
    /// Check if nothing failed or errored
    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0 && self.error_count() == 0
    }

    pub fn passed_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Passed))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn error_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Error(_)))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.cases.iter().filter(|c| pred(&c.outcome)).count()
    }

    /// Merge the cases of another run (e.g. the next suite).
    pub fn extend(&mut self, other: TestResult) {
        self.cases.extend(other.cases);
        self.duration += other.duration;
    }

    /// Format a summary line
    pub fn summary(&self) -> String {
        format!(
            "{} passed, {} failed, {} errors, {} skipped ({}ms)",
            self.passed_count(),
            self.failed_count(),
            self.error_count(),
            self.skipped_count(),
            self.duration.as_millis(),
        )
    }

    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }

    /// Per-case PASS/FAIL/ERROR/SKIP lines; transcripts are shown for
    /// unsuccessful cases, and for all cases when `verbose`.
    pub fn report(&self, verbose: bool) -> String {
        let mut out = String::new();
        for case in &self.cases {
            let show_log = match &case.outcome {
                Outcome::Passed => {
                    out.push_str(&format!("PASS  {} ({}ms)\n", case.name, case.duration.as_millis()));
                    verbose
                }
                Outcome::Skipped(reason) => {
                    out.push_str(&format!("SKIP  {} - {}\n", case.name, reason));
                    false
                }
                Outcome::Failed(diag) | Outcome::Error(diag) => {
                    let tag = if matches!(case.outcome, Outcome::Error(_)) { "ERROR" } else { "FAIL " };
                    out.push_str(&format!("{} {}\n", tag, case.name));
                    for line in diag.lines() {
                        out.push_str(&format!("      {}\n", line));
                    }
                    true
                }
            };
            if show_log && !case.log.is_empty() {
                out.push_str("      --- log ---\n");
                for line in case.log.lines() {
                    out.push_str(&format!("      {}\n", line));
                }
            }
        }
        out
    }
}

/// The test runner
pub struct TestRunner {
    config: RunConfig,
}

impl TestRunner {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    fn selected(&self, case: &TestCase) -> bool {
        self.config
            .filter
            .as_ref()
            .map_or(true, |re| re.is_match(&case.name))
    }

    /// Count the number of cases that would be run
    pub fn count_tests(&self, suite: &Suite) -> usize {
        suite.cases.iter().filter(|c| self.selected(c)).count()
    }

    /// Run every selected case of `suite`, in order.
    pub fn run(&self, session: &mut Session, suite: &Suite) -> TestResult {
        let start = Instant::now();
        let mut cases = Vec::new();
        let mut halted: Option<String> = None;

        for case in suite.cases.iter().filter(|c| self.selected(c)) {
            let skip_reason = match (&halted, case.continuity) {
                (Some(reason), _) => Some(reason.clone()),
                (None, Continuity::Continue) if session.state() != SessionState::Ready => {
                    Some("previous test did not complete, nothing to continue from".to_string())
                }
                _ => None,
            };
            if let Some(reason) = skip_reason {
                tracing::warn!(case = %case.name, "skipped: {}", reason);
                cases.push(TestCaseResult {
                    name: case.name.clone(),
                    suite: suite.name.clone(),
                    outcome: Outcome::Skipped(reason),
                    log: String::new(),
                    duration: Duration::ZERO,
                });
                continue;
            }

            let case_start = Instant::now();
            let outcome = match self.run_case(session, suite, case) {
                Ok(()) => Outcome::Passed,
                Err(e) => {
                    session.abort_case(&e);
                    if e.is_skip() {
                        Outcome::Skipped(e.message)
                    } else if e.is_fatal() {
                        halted = Some(format!("session failed during {}", case.name));
                        Outcome::Error(format!("{}: {}", case.name, e))
                    } else {
                        if self.config.stop_on_first_failure {
                            halted = Some(format!("stopped after failure of {}", case.name));
                        }
                        Outcome::Failed(format!("{}: {}", case.name, e))
                    }
                }
            };
            tracing::info!(case = %case.name, ?outcome, "test finished");
            cases.push(TestCaseResult {
                name: case.name.clone(),
                suite: suite.name.clone(),
                outcome,
                log: session.take_log(),
                duration: case_start.elapsed(),
            });
        }

        TestResult {
            cases,
            duration: start.elapsed(),
        }
    }

    fn run_case(&self, session: &mut Session, suite: &Suite, case: &TestCase) -> Result<(), HarnessError> {
        session.begin_case(&case.name, case.continuity, suite.hooks.on_reset.as_deref())?;
        if let Some(ref setup) = suite.hooks.on_setup {
            setup(session)?;
        }
        (case.body)(session)?;
        session.end_case(suite.hooks.on_teardown.as_deref())
    }
}

/// Builder API for convenient test runner construction
#[derive(Default)]
pub struct TestRunnerBuilder {
    config: RunConfig,
    filter: Option<String>,
}

impl TestRunnerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only run cases whose name matches this regular expression
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn stop_on_first_failure(mut self, stop: bool) -> Self {
        self.config.stop_on_first_failure = stop;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Build the runner; fails only on an invalid filter.
    pub fn build(mut self) -> Result<TestRunner, regex::Error> {
        if let Some(ref filter) = self.filter {
            self.config.filter = Some(Regex::new(filter)?);
        }
        Ok(TestRunner::new(self.config))
    }
}

/// Run a script against a target and integrate with `#[test]` by panicking
/// on failure.
///
/// ```rust,ignore
/// #[test]
/// fn dpp_on_target() {
///     emx_tracespec::run_and_assert("127.0.0.1:6601", "tests/dpp.tspec");
/// }
/// ```
pub fn run_and_assert(target: impl ToSocketAddrs, script: impl AsRef<Path>) {
    run_and_assert_with(target, script, |_| {});
}

/// Like `run_and_assert` but allows engine customization.
pub fn run_and_assert_with(
    target: impl ToSocketAddrs,
    script: impl AsRef<Path>,
    customize: impl FnOnce(&mut Engine),
) {
    let mut engine = Engine::new();
    customize(&mut engine);
    let engine = Arc::new(engine);

    let mut config = RunConfig {
        verbose: std::env::var("TRACESPEC_VERBOSE").is_ok(),
        ..Default::default()
    };
    if let Some(ms) = std::env::var("TRACESPEC_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        config.timeout = Duration::from_millis(ms);
    }

    let suite = crate::script::load_suite(&engine, script.as_ref())
        .unwrap_or_else(|e| panic!("failed to load {}: {}", script.as_ref().display(), e));
    let mut session = Session::connect(target, config.session_config())
        .unwrap_or_else(|e| panic!("failed to connect to target: {}", e));

    let verbose = config.verbose;
    let result = TestRunner::new(config).run(&mut session, &suite);
    session.close();

    eprint!("{}", result.report(verbose));
    eprintln!("\n{}", result.summary());

    if !result.all_passed() {
        panic!(
            "{} test(s) failed, {} error(s)",
            result.failed_count(),
            result.error_count()
        );
    }
}
