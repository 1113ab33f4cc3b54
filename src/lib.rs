//! emx-tracespec: trace-driven testing of embedded targets
//!
//! A target streams HDLC-framed software-tracing records over a byte link
//! and accepts framed commands on the way back. A test case injects stimuli
//! (events, ticks, memory pokes) and declares, in order, the records the
//! target must produce in response. Anything else is a failure.
//!
//! # Overview
//!
//! - [`frame`] / [`decoder`]: HDLC framing and record decoding, run on a
//!   reader thread feeding an mpsc channel.
//! - [`pattern`] / [`queue`]: token patterns with `*` and `@timestamp`, and
//!   the strict FIFO of pending expectations.
//! - [`channel`]: command encoding, sequence numbers and the one-run-at-a-time
//!   rule.
//! - [`session`]: the controller tying all of the above to one live target.
//! - [`runner`] / [`script`] / [`engine`]: test cases, suites and `.tspec`
//!   scripts.
//!
//! # Script Syntax
//!
//! ```text
//! on_reset
//! expect_pause
//! glb_filter SM AO
//! current_obj SM AO_Philo
//! continue_test
//!
//! test 'philo eats'
//! dispatch EAT_SIG u8:2
//! expect '@timestamp ===>Tran Obj=AO_Philo *'
//! expect '@timestamp Trg-Done QS_RX_EVENT'
//! ```
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `expect` | Queue a record pattern |
//! | `expect_pause` | Target stops at a test pause |
//! | `expect_run` | Target enters its event loop |
//! | `continue_test` | Release a paused target |
//! | `glb_filter` | Global record filter |
//! | `loc_filter` | Local object filter |
//! | `ao_filter` | Local filter by AO priority |
//! | `current_obj` | Select a current object |
//! | `query_curr` | Query a current object |
//! | `post` | Post an event to the current AO |
//! | `publish` | Publish an event |
//! | `dispatch` | Dispatch an event to the current SM |
//! | `init` | Initial transition of the current SM |
//! | `tick` | Advance a clock tick |
//! | `command` | Application command |
//! | `probe` | Arm a test probe |
//! | `poke` | Write memory |
//! | `fill` | Fill memory |
//! | `peek` | Read memory |
//! | `skip` | Skip the test |
//! | `help` | Describe commands |
//!
//! Every command sent to the target expects its `Trg-Ack` automatically;
//! commands that run the target to completion (`command`, `tick`, events)
//! also need an explicit `expect '@timestamp Trg-Done QS_RX_...'`.

pub mod channel;
pub mod commands;
pub mod decoder;
pub mod dictionary;
pub mod engine;
pub mod error;
pub mod filter;
pub mod frame;
pub mod parser;
pub mod pattern;
pub mod queue;
pub mod record;
pub mod runner;
pub mod script;
pub mod session;

pub use channel::{Command, CommandChannel, TargetLayout};
pub use commands::default_commands;
pub use decoder::{DecodeError, TraceDecoder};
pub use engine::{Cmd, CmdResult, CmdUsage, Engine};
pub use error::{ErrorKind, HarnessError};
pub use filter::{FilterSet, ObjKind};
pub use parser::{parse_line, ArgFragment, ScriptLine};
pub use pattern::{matches, ExpectationPattern, PatternToken};
pub use queue::{ExpectationQueue, Mismatch};
pub use record::TraceRecord;
pub use runner::{
    Hooks, Outcome, RunConfig, Suite, TestCase, TestCaseResult, TestResult, TestRunner,
    TestRunnerBuilder,
};
pub use script::load_suite;
pub use session::{Continuity, Session, SessionConfig, SessionState};

// Convenience functions for cargo test integration
pub use runner::{run_and_assert, run_and_assert_with};
