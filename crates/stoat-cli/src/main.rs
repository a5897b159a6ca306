use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tracing_subscriber::filter::EnvFilter;

use stoat_harness::{
    Baseline, ExecOutcome, HarnessConfig, HarnessError, HarnessResult, PipelineConfig, PoolConfig,
    Report, RunComparison, RunSummary, Strictness, TestPipeline, Verdict, resolve_jobs, run_pool,
};

#[derive(Parser, Debug)]
#[command(name = "stoat", version)]
#[command(about = "Run conformance test suites against a JavaScript engine")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run tests (the default when no subcommand is given)
    Run(RunArgs),
    /// List the tests a run would select, without running them
    List(RunArgs),
    /// Run a single test and show per-mode engine output
    Eval(EvalArgs),
    /// Compare two saved reports
    Compare(CompareArgs),
    /// Write a baseline expectations file from a saved report
    Baseline(BaselineArgs),
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Test files or directories, relative to the suite's test/ directory
    #[arg(value_name = "PATHS")]
    paths: Vec<String>,

    /// Config file (default: stoat.toml in the working directory)
    #[arg(short = 'C', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Suite root containing test/ and harness/
    #[arg(long, value_name = "DIR")]
    suite: Option<PathBuf>,

    /// Named engine profile from the config
    #[arg(long, value_name = "NAME")]
    engine: Option<String>,

    /// Engine binary to run with default settings, bypassing profiles
    #[arg(long, value_name = "BIN")]
    engine_cmd: Option<PathBuf>,

    /// Worker count (0 = one per CPU)
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Per-test timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Filter tests by path substring
    #[arg(short, long, value_name = "PATTERN")]
    filter: Option<String>,

    /// Run only tests listing this feature (repeatable)
    #[arg(long = "feature", value_name = "NAME")]
    features: Vec<String>,

    /// Skip tests listing this feature, in addition to the config list
    #[arg(long = "skip-feature", value_name = "NAME")]
    skip_features: Vec<String>,

    /// Run only the strict variant of unflagged tests
    #[arg(long, conflicts_with = "sloppy_only")]
    strict_only: bool,

    /// Run only the non-strict variant of unflagged tests
    #[arg(long)]
    sloppy_only: bool,

    /// Baseline expectations file for regression classification
    #[arg(long, value_name = "FILE")]
    baseline: Option<PathBuf>,

    /// What makes the run exit nonzero
    #[arg(long, value_name = "POLICY", value_enum)]
    fail_on: Option<FailOn>,

    /// Write the full report to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Stream every result as JSON lines to this file
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Append to the log file instead of truncating it
    #[arg(long, requires = "log")]
    log_append: bool,

    /// Print the report as JSON on stdout and nothing else
    #[arg(long)]
    json: bool,

    /// Only list matching tests without running them
    #[arg(long)]
    list: bool,

    /// Maximum number of tests to run
    #[arg(short = 'n', long, value_name = "N")]
    max_tests: Option<usize>,

    /// Per-test output: once for one character, twice for one line
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Show memory usage statistics
    #[arg(long)]
    memory_stats: bool,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args, Debug, Clone)]
struct EvalArgs {
    /// Test file, relative to the suite's test/ directory
    #[arg(value_name = "TEST")]
    test: String,

    /// Config file (default: stoat.toml in the working directory)
    #[arg(short = 'C', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Suite root containing test/ and harness/
    #[arg(long, value_name = "DIR")]
    suite: Option<PathBuf>,

    /// Named engine profile from the config
    #[arg(long, value_name = "NAME")]
    engine: Option<String>,

    /// Engine binary to run with default settings, bypassing profiles
    #[arg(long, value_name = "BIN")]
    engine_cmd: Option<PathBuf>,

    /// Per-test timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

#[derive(Args, Debug, Clone)]
struct CompareArgs {
    /// Report taken as the reference
    #[arg(value_name = "BASE")]
    base: PathBuf,

    /// Report to judge against the reference
    #[arg(value_name = "NEW")]
    new: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct BaselineArgs {
    /// Saved report to derive expectations from
    #[arg(value_name = "REPORT")]
    report: PathBuf,

    /// Where to write the expectations file
    #[arg(short, long, value_name = "FILE", default_value = "expectations.json")]
    output: PathBuf,
}

/// Exit-code policy for `run`. Defaults to `regressions` when a baseline
/// is in play and `failures` otherwise.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FailOn {
    /// Nonzero exit only for regressions against the baseline
    Regressions,
    /// Nonzero exit for any failed, timed out, or crashed test
    Failures,
    /// Nonzero exit for regressions or shifted failure kinds
    Changes,
    /// Always exit zero
    Never,
}

/// Memory statistics tracker for the harness process itself. The engine
/// subprocesses are not included; this measures the runner's overhead.
struct MemoryTracker {
    system: System,
    pid: Pid,
    peak_memory_bytes: u64,
    initial_memory_bytes: u64,
}

impl MemoryTracker {
    fn new() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut system = System::new_with_specifics(
            RefreshKind::nothing().with_processes(ProcessRefreshKind::everything()),
        );
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        let initial = system.process(pid).map(|p| p.memory()).unwrap_or(0);
        Self {
            system,
            pid,
            peak_memory_bytes: initial,
            initial_memory_bytes: initial,
        }
    }

    fn update(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        if let Some(process) = self.system.process(self.pid) {
            let current = process.memory();
            if current > self.peak_memory_bytes {
                self.peak_memory_bytes = current;
            }
        }
    }

    fn current_memory_mb(&mut self) -> f64 {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        self.system
            .process(self.pid)
            .map(|p| p.memory() as f64 / 1_048_576.0)
            .unwrap_or(0.0)
    }

    fn peak_memory_mb(&self) -> f64 {
        self.peak_memory_bytes as f64 / 1_048_576.0
    }

    fn initial_memory_mb(&self) -> f64 {
        self.initial_memory_bytes as f64 / 1_048_576.0
    }

    fn memory_increase_mb(&mut self) -> f64 {
        self.current_memory_mb() - self.initial_memory_mb()
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        None => cmd_run(cli.run),
        Some(Commands::Run(args)) => cmd_run(args),
        Some(Commands::List(mut args)) => {
            args.list = true;
            cmd_run(args)
        }
        Some(Commands::Eval(args)) => cmd_eval(args),
        Some(Commands::Compare(args)) => cmd_compare(args),
        Some(Commands::Baseline(args)) => cmd_baseline(args),
    };
    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            std::process::exit(e.exit_code());
        }
    }
}

fn cmd_run(args: RunArgs) -> HarnessResult<i32> {
    let config = HarnessConfig::load_or_default(args.config.as_deref())?;
    let profile = config.resolve_engine(args.engine.as_deref(), args.engine_cmd.as_deref())?;
    let engine_label = if profile.name.is_empty() {
        profile.binary.display().to_string()
    } else {
        profile.name.clone()
    };
    let suite_root = args
        .suite
        .clone()
        .or_else(|| config.suite_dir.clone())
        .ok_or_else(|| {
            HarnessError::Config(
                "no suite directory; pass --suite or set suite_dir in the config".to_string(),
            )
        })?;

    let mut skip_features = config.skip_features.clone();
    skip_features.extend(args.skip_features.iter().cloned());
    let strictness = if args.strict_only {
        Some(Strictness::StrictOnly)
    } else if args.sloppy_only {
        Some(Strictness::SloppyOnly)
    } else {
        None
    };

    let pipeline = Arc::new(TestPipeline::new(PipelineConfig {
        suite_root: suite_root.clone(),
        profile,
        timeout: Duration::from_secs(args.timeout.unwrap_or(config.timeout_secs)),
        skip_features,
        only_features: args.features.clone(),
        ignored_tests: config.ignored_tests.clone(),
        known_crashes: config.known_crashes.clone(),
        strictness,
    })?);

    let tests = pipeline.discover(&args.paths, args.filter.as_deref(), args.max_tests)?;

    if args.list {
        for test in &tests {
            println!("{}", test.display());
        }
        println!("\nTotal: {} tests", tests.len());
        return Ok(0);
    }

    if !args.json {
        println!("{}", "Stoat Conformance Runner".bold().cyan());
        println!("Engine: {engine_label}");
        println!("Suite:  {}", suite_root.display());
        if let Some(ref filter) = args.filter {
            println!("Filter: {filter}");
        }
        println!("Tests:  {}", tests.len());
    }

    let mut memory_tracker = if args.memory_stats {
        let tracker = MemoryTracker::new();
        if !args.json {
            println!("Initial memory: {:.2} MB", tracker.initial_memory_mb());
        }
        Some(tracker)
    } else {
        None
    };

    let progress = (!args.json && args.verbose == 0 && !args.no_progress).then(|| {
        let pb = ProgressBar::new(tests.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb
    });

    let pool_config = PoolConfig {
        jobs: resolve_jobs(args.jobs.unwrap_or(config.jobs)),
        verbose: args.verbose,
        json_mode: args.json,
        log_path: args.log.clone(),
        log_append: args.log_append,
        max_failures: if args.json { 5000 } else { 25 },
    };
    let (summary, results) = run_pool(Arc::clone(&pipeline), tests, &pool_config, progress)?;

    if let Some(ref mut tracker) = memory_tracker {
        tracker.update();
    }

    let report = Report::build(
        &summary,
        &results,
        &engine_label,
        &suite_root.display().to_string(),
    );

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("failed to serialize report: {e}"),
        }
    } else {
        summary.print_summary();
    }

    let report_path = args.report.clone().or_else(|| {
        config.results_dir.as_ref().map(|dir| {
            dir.join(format!(
                "stoat-{}.json",
                chrono::Utc::now().format("%Y%m%d-%H%M%S")
            ))
        })
    });
    if let Some(path) = report_path {
        report.save(&path)?;
        if !args.json {
            println!("\nReport written to {}", path.display());
        }
    }

    let baseline_path = args.baseline.clone().or_else(|| config.baseline.clone());
    let delta = match baseline_path {
        Some(path) => {
            let baseline = Baseline::load(&path)?;
            let delta = baseline.classify(results.records());
            if !args.json {
                delta.print();
            }
            Some(delta)
        }
        None => None,
    };

    if let Some(ref mut tracker) = memory_tracker {
        print_memory_report(tracker, &summary);
    }

    let failures = summary.failed + summary.timeout + summary.crashed;
    let policy = args.fail_on.unwrap_or(if delta.is_some() {
        FailOn::Regressions
    } else {
        FailOn::Failures
    });
    let failed = match (policy, &delta) {
        (FailOn::Never, _) => false,
        (FailOn::Failures, _) => failures > 0,
        (FailOn::Regressions, Some(d)) => !d.regressions.is_empty(),
        (FailOn::Changes, Some(d)) => !d.regressions.is_empty() || !d.shifted.is_empty(),
        // Without a baseline every test is expected to pass, so any
        // failure counts as a regression.
        (FailOn::Regressions | FailOn::Changes, None) => failures > 0,
    };
    Ok(if failed { 1 } else { 0 })
}

fn cmd_eval(args: EvalArgs) -> HarnessResult<i32> {
    let config = HarnessConfig::load_or_default(args.config.as_deref())?;
    let profile = config.resolve_engine(args.engine.as_deref(), args.engine_cmd.as_deref())?;
    let suite_root = args
        .suite
        .clone()
        .or_else(|| config.suite_dir.clone())
        .ok_or_else(|| {
            HarnessError::Config(
                "no suite directory; pass --suite or set suite_dir in the config".to_string(),
            )
        })?;

    // Skip lists are left empty: a test named explicitly should run even
    // if a full run would skip it.
    let pipeline = TestPipeline::new(PipelineConfig {
        suite_root,
        profile,
        timeout: Duration::from_secs(args.timeout.unwrap_or(config.timeout_secs)),
        skip_features: Vec::new(),
        only_features: Vec::new(),
        ignored_tests: Vec::new(),
        known_crashes: Vec::new(),
        strictness: None,
    })?;

    let tests = pipeline.discover(&[args.test.clone()], None, None)?;
    let path = match tests.as_slice() {
        [one] => one.clone(),
        [] => return Err(HarnessError::TestPathNotFound(PathBuf::from(&args.test))),
        many => {
            return Err(HarnessError::Config(format!(
                "eval expects a single test file, {} matched",
                many.len()
            )));
        }
    };

    let case = pipeline.run_case_blocking(&path)?;
    println!(
        "{} {} ({}ms)",
        paint_verdict(case.record.verdict),
        case.record.path,
        case.record.duration_ms
    );
    if let Some(ref error) = case.record.error {
        println!("  {error}");
    }
    for note in &case.record.annotations {
        println!("  note: {note}");
    }

    for run in &case.runs {
        println!(
            "\n--- {} mode: {} ---",
            run.mode,
            paint_verdict(run.judged.verdict)
        );
        match &run.outcome {
            ExecOutcome::Completed(output) => {
                println!("status: {}", output.describe_status());
                if !output.stdout.trim().is_empty() {
                    println!("stdout:\n{}", output.stdout.trim_end());
                }
                if !output.stderr.trim().is_empty() {
                    println!("stderr:\n{}", output.stderr.trim_end());
                }
            }
            ExecOutcome::TimedOut { waited } => {
                println!("timed out after {:.1}s", waited.as_secs_f64());
            }
            ExecOutcome::SpawnFailed(e) => {
                println!("spawn failed: {e}");
            }
        }
    }

    Ok(if case.record.verdict.is_failure() { 1 } else { 0 })
}

fn cmd_compare(args: CompareArgs) -> HarnessResult<i32> {
    let comparison = RunComparison::compare_files(&args.base, &args.new)?;
    comparison.print();
    Ok(if comparison.is_clean() { 0 } else { 1 })
}

fn cmd_baseline(args: BaselineArgs) -> HarnessResult<i32> {
    let report = Report::load(&args.report)?;
    let baseline = Baseline::from_report(&report);
    baseline.save(&args.output)?;
    println!(
        "Baseline written to {} ({} expected failures)",
        args.output.display(),
        baseline.len()
    );
    Ok(0)
}

fn paint_verdict(verdict: Verdict) -> ColoredString {
    match verdict {
        Verdict::Pass => "PASS".green(),
        Verdict::Fail => "FAIL".red(),
        Verdict::Timeout => "TIMEOUT".magenta(),
        Verdict::Crash => "CRASH".red().bold(),
        Verdict::Skip => "SKIP".yellow(),
    }
}

fn print_memory_report(tracker: &mut MemoryTracker, summary: &RunSummary) {
    println!();
    println!("╭─────────────────────────────────────╮");
    println!("│       Stoat Profiling Report        │");
    println!("├─────────────────────────────────────┤");
    println!("│ Execution Statistics                │");
    println!("│   Total Tests: {:>10}           │", summary.total);
    println!("│   Passed:      {:>10}           │", summary.passed);
    println!("│   Failed:      {:>10}           │", summary.failed);
    println!("│   Pass Rate:   {:>10.2}%          │", summary.pass_rate());
    println!("├─────────────────────────────────────┤");
    println!("│ Memory Usage Metrics                │");
    println!(
        "│   Initial:     {:>10.2} MB       │",
        tracker.initial_memory_mb()
    );
    println!(
        "│   Peak:        {:>10.2} MB       │",
        tracker.peak_memory_mb()
    );
    println!(
        "│   Current:     {:>10.2} MB       │",
        tracker.current_memory_mb()
    );
    println!(
        "│   Increase:    {:>10.2} MB       │",
        tracker.memory_increase_mb()
    );
    println!("╰─────────────────────────────────────╯");
}
