//! End-to-end runs of `.tspec` scripts against a simulated target.
//!
//! Usage:
//!   cargo test --test integration
//!   RUST_LOG=emx_tracespec=debug cargo test --test integration -- --nocapture

mod common;

use common::{config, run_script, SimTarget};
use emx_tracespec::{Outcome, RunConfig, TestRunnerBuilder};
use regex::Regex;

const PREAMBLE: &str = "\
on_reset
expect_pause
glb_filter ALL
current_obj SM_AO AO_Philo
continue_test
";

fn failed_with(outcome: &Outcome, needle: &str) -> bool {
    matches!(outcome, Outcome::Failed(diag) if diag.contains(needle))
}

fn errored_with(outcome: &Outcome, needle: &str) -> bool {
    matches!(outcome, Outcome::Error(diag) if diag.contains(needle))
}

#[test]
fn passing_suite() {
    let target = SimTarget::spawn();
    let script = format!(
        "{PREAMBLE}
test 'philo eats'
post EAT_SIG u8:3
expect '@timestamp Philo-Eat n=3'
expect '@timestamp Trg-Done QS_RX_EVENT'

test 'clock keeps going' noreset
tick
expect '@timestamp Tick Philo *'
expect '@timestamp Trg-Done QS_RX_TICK'
dispatch EAT_SIG
expect '@timestamp Philo-Eat n=0'
expect '@timestamp Trg-Done QS_RX_EVENT'

test 'application command'
command 3 1 2 3
expect '@timestamp Command id=3'
expect '@timestamp Trg-Done QS_RX_COMMAND'
probe Philo_think 1
query_curr SM
expect 'Query-SM *'

test memory
current_obj AP AP_Table
poke 0 1 0xAA 0xBB
fill 2 2 4 0
peek 0 1 1
expect 'Trg-Peek Offs=0,Size=1,Num=1,Data=<00>'
"
    );
    let result = run_script(&target, &script, config());
    for case in &result.cases {
        assert_eq!(case.outcome, Outcome::Passed, "{}:\n{}", case.name, case.log);
    }
    assert_eq!(result.passed_count(), 4);
    assert_eq!(result.exit_code(), 0);
}

#[test]
fn default_reset_command_order() {
    let target = SimTarget::spawn();
    let result = run_script(
        &target,
        "test one\ntick\nexpect '@timestamp Tick Philo timeout'\nexpect '@timestamp Trg-Done QS_RX_TICK'\n",
        config(),
    );
    assert!(result.all_passed(), "{}", result.report(true));
    // reset, continue, setup, tick, teardown
    assert_eq!(target.received(), vec![2, 14, 7, 3, 8]);
}

#[test]
fn mismatch_fails_and_next_case_resets() {
    let target = SimTarget::spawn();
    let script = format!(
        "{PREAMBLE}
test wrong
post EAT_SIG u8:1
expect '@timestamp Philo-Eat n=2'
expect '@timestamp Trg-Done QS_RX_EVENT'

test right
post EAT_SIG u8:2
expect '@timestamp Philo-Eat n=2'
expect '@timestamp Trg-Done QS_RX_EVENT'
"
    );
    let result = run_script(&target, &script, config());
    assert!(failed_with(&result.cases[0].outcome, "[-n=2-]{+n=1+}"), "{:?}", result.cases[0].outcome);
    assert_eq!(result.cases[1].outcome, Outcome::Passed, "{}", result.cases[1].log);
    assert_eq!(result.exit_code(), 1);
}

#[test]
fn missing_done_fails_and_continuation_is_skipped() {
    let target = SimTarget::spawn();
    let script = format!(
        "{PREAMBLE}
test hungry
post HUNGRY_SIG
expect '@timestamp Philo-Hungry'

test 'after hungry' noreset
tick
"
    );
    let result = run_script(&target, &script, config());
    assert!(
        failed_with(&result.cases[0].outcome, "run of QS_RX_EVENT was never seen to complete"),
        "{:?}",
        result.cases[0].outcome
    );
    assert!(matches!(result.cases[1].outcome, Outcome::Skipped(_)));
}

#[test]
fn unexpected_record_fails() {
    let target = SimTarget::spawn();
    let script = format!(
        "{PREAMBLE}
test noisy
post NOISY_SIG
expect '@timestamp Trg-Done QS_RX_EVENT'
"
    );
    let result = run_script(&target, &script, config());
    assert!(failed_with(&result.cases[0].outcome, "Philo-Burp"), "{:?}", result.cases[0].outcome);
}

#[test]
fn command_during_run_is_fatal() {
    let target = SimTarget::spawn();
    let script = format!(
        "{PREAMBLE}
test impatient
post EAT_SIG
tick

test never
tick
expect '@timestamp Tick Philo timeout'
expect '@timestamp Trg-Done QS_RX_TICK'
"
    );
    let result = run_script(&target, &script, config());
    assert!(
        errored_with(&result.cases[0].outcome, "QS_RX_EVENT"),
        "{:?}",
        result.cases[0].outcome
    );
    assert!(matches!(&result.cases[1].outcome, Outcome::Skipped(r) if r.contains("session failed")));
    assert_eq!(result.error_count(), 1);
    assert_eq!(result.exit_code(), 1);
}

#[test]
fn timeout_names_the_pending_expectation() {
    let target = SimTarget::spawn();
    let script = format!(
        "{PREAMBLE}
test slow
expect '@timestamp Philo-Never'
tick

test recovers
tick
expect '@timestamp Tick Philo timeout'
expect '@timestamp Trg-Done QS_RX_TICK'
"
    );
    let result = run_script(&target, &script, config());
    let outcome = &result.cases[0].outcome;
    assert!(failed_with(outcome, "no record received within 300ms"), "{:?}", outcome);
    assert!(failed_with(outcome, "suite.tspec:9: tick"), "{:?}", outcome);
    assert_eq!(result.cases[1].outcome, Outcome::Passed, "{}", result.cases[1].log);
}

#[test]
fn assertion_ends_case_and_forces_reset() {
    let target = SimTarget::spawn();
    let script = format!(
        "{PREAMBLE}
test 'philo asserts'
dispatch TIMEOUT_SIG
expect '@timestamp Disp===> Obj=AO_Philo,Sig=TIMEOUT_SIG'
expect '@timestamp =ASSERT= Mod=qf_actq,Loc=110'

test 'after assert' noreset
tick
expect '@timestamp Tick Philo timeout'
expect '@timestamp Trg-Done QS_RX_TICK'

test 'fresh start'
tick
expect '@timestamp Tick Philo timeout'
expect '@timestamp Trg-Done QS_RX_TICK'
"
    );
    let result = run_script(&target, &script, config());
    assert_eq!(result.cases[0].outcome, Outcome::Passed, "{}", result.cases[0].log);
    assert!(
        matches!(result.cases[1].outcome, Outcome::Skipped(_)),
        "{:?}",
        result.cases[1].outcome
    );
    assert_eq!(result.cases[2].outcome, Outcome::Passed, "{}", result.cases[2].log);
    // the asserted case sends no teardown
    let received = target.received();
    let dispatched = received.iter().position(|&id| id == 16).unwrap();
    assert_eq!(received[dispatched + 1], 2);
}

#[test]
fn corrupted_stream_is_fatal() {
    let target = SimTarget::spawn();
    let script = format!(
        "{PREAMBLE}
test garbage
command 0xEE
expect '@timestamp Trg-Done QS_RX_COMMAND'

test later
tick
"
    );
    let result = run_script(&target, &script, config());
    assert!(errored_with(&result.cases[0].outcome, "checksum"), "{:?}", result.cases[0].outcome);
    assert!(matches!(result.cases[1].outcome, Outcome::Skipped(_)));
}

#[test]
fn skip_and_usage_errors() {
    let target = SimTarget::spawn();
    let script = format!(
        "{PREAMBLE}
test skipped
skip 'needs a real board'

test 'bad signal'
post NO_SUCH_SIG

test 'bad params'
post EAT_SIG u8:300

test 'bad poke'
current_obj AP AP_Table
poke 0 1 0x1FF
"
    );
    let result = run_script(&target, &script, config());
    assert_eq!(
        result.cases[0].outcome,
        Outcome::Skipped("needs a real board".to_string())
    );
    assert!(failed_with(&result.cases[1].outcome, "unknown signal \"NO_SUCH_SIG\""));
    assert!(failed_with(&result.cases[2].outcome, "invalid u8 value"));
    assert!(
        failed_with(&result.cases[3].outcome, "value 0x1FF does not fit in 1 byte"),
        "{:?}",
        result.cases[3].outcome
    );
    assert_eq!(result.skipped_count(), 1);
}

#[test]
fn filter_and_stop_on_first_failure() {
    let target = SimTarget::spawn();
    let script = format!(
        "{PREAMBLE}
test 'eat once'
post EAT_SIG u8:1
expect '@timestamp Philo-Eat n=9'
expect '@timestamp Trg-Done QS_RX_EVENT'

test 'eat twice'
post EAT_SIG u8:2
expect '@timestamp Philo-Eat n=2'
expect '@timestamp Trg-Done QS_RX_EVENT'

test 'tick once'
tick
expect '@timestamp Tick Philo timeout'
expect '@timestamp Trg-Done QS_RX_TICK'
"
    );

    let filtered = RunConfig {
        filter: Some(Regex::new("^eat").unwrap()),
        ..config()
    };
    let result = run_script(&target, &script, filtered);
    assert_eq!(result.cases.len(), 2);
    assert_eq!(result.failed_count(), 1);
    assert_eq!(result.passed_count(), 1);

    let runner = TestRunnerBuilder::new()
        .stop_on_first_failure(true)
        .timeout(config().timeout)
        .build()
        .unwrap();
    let result = run_script(&target, &script, runner.config().clone());
    assert_eq!(result.failed_count(), 1);
    assert_eq!(result.skipped_count(), 2);
}
