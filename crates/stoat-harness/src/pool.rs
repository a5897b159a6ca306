//! Bounded worker pool driving the pipeline over many tests.
//!
//! Worker threads pull paths from a bounded channel and push records to a
//! collector on the calling thread, so results stream while the run is in
//! flight. Each worker owns one sandbox and one current-thread runtime for
//! subprocess supervision.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write as _};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use colored::Colorize;
use crossbeam_channel::bounded;
use indicatif::ProgressBar;

use crate::error::{HarnessError, HarnessResult};
use crate::report::RunSummary;
use crate::results::{ResultSet, TestRecord, Verdict};
use crate::runner::TestPipeline;
use crate::sandbox::Sandbox;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker thread count, already resolved to a positive number.
    pub jobs: usize,
    /// 0 = quiet, 1 = one character per test, 2+ = one line per test.
    pub verbose: u8,
    /// Suppresses all per-test console output.
    pub json_mode: bool,
    /// JSONL stream of every record as it completes.
    pub log_path: Option<PathBuf>,
    pub log_append: bool,
    /// Cap on retained failure details in the summary.
    pub max_failures: usize,
}

enum JobOutput {
    Record(TestRecord),
    /// Run-aborting harness error; the collector stops feeding work.
    Fatal(HarnessError),
}

pub fn resolve_jobs(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get()
    } else {
        requested
    }
}

/// Run `tests` through the pipeline on `config.jobs` workers. Returns the
/// aggregated summary and the full result set, or the first fatal error.
pub fn run_pool(
    pipeline: Arc<TestPipeline>,
    tests: Vec<PathBuf>,
    config: &PoolConfig,
    progress: Option<ProgressBar>,
) -> HarnessResult<(RunSummary, ResultSet)> {
    let total = tests.len();
    let jobs = config.jobs.max(1);
    let started = Instant::now();

    let mut log_writer = match &config.log_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(config.log_append)
                .truncate(!config.log_append)
                .write(true)
                .open(path)
                .map_err(|source| HarnessError::Write {
                    path: path.clone(),
                    source,
                })?;
            Some(BufWriter::new(file))
        }
        None => None,
    };

    let (job_tx, job_rx) = bounded::<PathBuf>(jobs * 4);
    let (result_tx, result_rx) = bounded::<JobOutput>(jobs * 8);

    let sender = std::thread::Builder::new()
        .name("stoat-sender".to_string())
        .spawn(move || {
            for path in tests {
                if job_tx.send(path).is_err() {
                    break;
                }
            }
        })?;

    let mut workers = Vec::with_capacity(jobs);
    for i in 0..jobs {
        let pipeline = Arc::clone(&pipeline);
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let handle = std::thread::Builder::new()
            .name(format!("stoat-worker-{i}"))
            .spawn(move || worker_main(i, pipeline, job_rx, result_tx))?;
        workers.push(handle);
    }
    drop(job_rx);
    drop(result_tx);

    let mut summary = RunSummary::new(config.max_failures);
    let mut results = ResultSet::new();
    let mut fatal: Option<HarnessError> = None;
    let mut line_len = 0usize;

    for output in &result_rx {
        match output {
            JobOutput::Record(record) => {
                if let Some(writer) = &mut log_writer {
                    if let Ok(json) = serde_json::to_string(&record) {
                        let _ = writeln!(writer, "{json}");
                    }
                }
                render_progress(&record, config, &progress, &mut line_len);
                summary.record(&record);
                results.insert(record);
            }
            JobOutput::Fatal(error) => {
                fatal = Some(error);
                break;
            }
        }
    }
    drop(result_rx);

    if config.verbose == 1 && !config.json_mode && line_len > 0 {
        eprintln!();
    }
    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }
    if let Some(writer) = &mut log_writer {
        let _ = writer.flush();
    }

    if sender.join().is_err() {
        tracing::error!("sender thread panicked");
    }
    for handle in workers {
        if let Err(panic) = handle.join() {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(%message, "worker thread panicked");
        }
    }

    summary.duration = started.elapsed();
    match fatal {
        Some(error) => Err(error),
        None => {
            if summary.total < total {
                tracing::warn!(
                    expected = total,
                    recorded = summary.total,
                    "run finished with missing records"
                );
            }
            Ok((summary, results))
        }
    }
}

fn worker_main(
    worker: usize,
    pipeline: Arc<TestPipeline>,
    job_rx: crossbeam_channel::Receiver<PathBuf>,
    result_tx: crossbeam_channel::Sender<JobOutput>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = result_tx.send(JobOutput::Fatal(e.into()));
            return;
        }
    };
    let sandbox = match Sandbox::new(pipeline.profile_arc(), worker) {
        Ok(sandbox) => sandbox,
        Err(e) => {
            let _ = result_tx.send(JobOutput::Fatal(e));
            return;
        }
    };
    for path in job_rx.iter() {
        let output = match runtime.block_on(pipeline.run_case(&sandbox, &path)) {
            Ok(case) => JobOutput::Record(case.record),
            Err(e) => JobOutput::Fatal(e),
        };
        let is_fatal = matches!(output, JobOutput::Fatal(_));
        if result_tx.send(output).is_err() || is_fatal {
            break;
        }
    }
}

fn render_progress(
    record: &TestRecord,
    config: &PoolConfig,
    progress: &Option<ProgressBar>,
    line_len: &mut usize,
) {
    if let Some(pb) = progress {
        pb.inc(1);
        pb.set_message(short_path(&record.path));
    }
    if config.json_mode {
        return;
    }
    if config.verbose == 1 {
        let ch = match record.verdict {
            Verdict::Pass => ".".green(),
            Verdict::Fail => "F".red(),
            Verdict::Skip => "S".yellow(),
            Verdict::Timeout => "T".magenta(),
            Verdict::Crash => "!".red().bold(),
        };
        eprint!("{ch}");
        *line_len += 1;
        if *line_len >= 80 {
            eprintln!();
            *line_len = 0;
        }
    } else if config.verbose >= 2 {
        let tag = match record.verdict {
            Verdict::Pass => "PASS".green(),
            Verdict::Fail => "FAIL".red(),
            Verdict::Skip => "SKIP".yellow(),
            Verdict::Timeout => "TIMEOUT".magenta(),
            Verdict::Crash => "CRASH".red().bold(),
        };
        match &record.error {
            Some(error) => eprintln!("[{tag}] {} ({}ms): {error}", record.path, record.duration_ms),
            None => eprintln!("[{tag}] {} ({}ms)", record.path, record.duration_ms),
        }
    }
}

fn short_path(path: &str) -> String {
    const MAX: usize = 48;
    if path.len() <= MAX {
        return path.to_string();
    }
    // The cut may land inside a multi-byte character.
    let mut cut = path.len() - MAX;
    while !path.is_char_boundary(cut) {
        cut += 1;
    }
    format!("...{}", &path[cut..])
}
