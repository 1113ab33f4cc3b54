//! emx-tracespec CLI
//!
//! Run `.tspec` scripts against a target reachable over TCP.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use emx_tracespec::{load_suite, Engine, Session, Suite, TestResult, TestRunnerBuilder};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "emx-tracespec")]
#[command(version)]
#[command(about = "Run trace-driven tests against an embedded target")]
struct Cli {
    /// Script files or directories containing .tspec scripts
    #[arg(default_value = ".")]
    paths: Vec<PathBuf>,

    /// Target trace link
    #[arg(short, long, default_value = "127.0.0.1:6601", value_name = "HOST:PORT")]
    target: String,

    /// Only run tests whose name matches this regular expression
    #[arg(short = 'f', long)]
    filter: Option<String>,

    /// Verbose output: show the session log of passing tests too
    #[arg(short, long)]
    verbose: bool,

    /// Stop at the first failing test
    #[arg(short = 'x', long = "exitfirst")]
    stop_on_first_failure: bool,

    /// How long to wait for each expected record, in milliseconds
    #[arg(long, default_value_t = 1000, value_name = "MS")]
    timeout: u64,

    /// Script variables (KEY=VALUE)
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE")]
    defines: Vec<String>,

    /// List available commands
    #[arg(long = "list-commands")]
    list_commands: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut engine = Engine::new();
    if cli.list_commands {
        print_commands(&engine);
        return Ok(ExitCode::SUCCESS);
    }
    for define in &cli.defines {
        let Some((key, value)) = define.split_once('=') else {
            bail!("invalid -D {:?}, expected KEY=VALUE", define);
        };
        engine.set_var(key, value);
    }
    let engine = Arc::new(engine);

    let mut builder = TestRunnerBuilder::new()
        .verbose(cli.verbose)
        .stop_on_first_failure(cli.stop_on_first_failure)
        .timeout(Duration::from_millis(cli.timeout));
    if let Some(filter) = cli.filter {
        builder = builder.filter(filter);
    }
    let runner = builder.build().context("invalid --filter")?;

    let mut suites: Vec<Suite> = Vec::new();
    for path in collect_scripts(&cli.paths)? {
        suites.push(load_suite(&engine, &path)?);
    }
    if suites.is_empty() {
        bail!("no .tspec scripts found");
    }

    let mut total = TestResult::default();
    for suite in &suites {
        if runner.count_tests(suite) == 0 {
            continue;
        }
        tracing::info!(suite = %suite.name, addr = %cli.target, "running suite");
        let mut session = Session::connect(cli.target.as_str(), runner.config().session_config())
            .with_context(|| format!("connecting to target at {}", cli.target))?;
        let result = runner.run(&mut session, suite);
        session.close();

        print!("{}", result.report(cli.verbose));
        total.extend(result);
        if !total.all_passed() && cli.stop_on_first_failure {
            break;
        }
    }

    println!();
    println!("{}", total.summary());

    Ok(if total.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Expand directories into their `.tspec` files, sorted by name.
fn collect_scripts(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut scripts = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("reading {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_script(p))
                .collect();
            found.sort();
            scripts.extend(found);
        } else if path.is_file() {
            scripts.push(path.clone());
        } else {
            bail!("{}: no such file or directory", path.display());
        }
    }
    Ok(scripts)
}

fn is_script(path: &Path) -> bool {
    path.is_file() && path.extension().map_or(false, |ext| ext == "tspec")
}

fn print_commands(engine: &Engine) {
    println!("Built-in commands:");
    println!();

    let mut cmds: Vec<_> = engine.commands.iter().collect();
    cmds.sort_by_key(|(name, _)| (*name).clone());

    for (name, cmd) in &cmds {
        let usage = cmd.usage();
        println!("  {:<14} {} {}", name, usage.summary, usage.args);
    }

    println!();
    println!("Sections:");
    println!("  on_reset       Runs after every target reset");
    println!("  on_setup       Runs at the start of every test");
    println!("  on_teardown    Runs at the end of every test");
    println!("  test NAME [noreset]");
}
