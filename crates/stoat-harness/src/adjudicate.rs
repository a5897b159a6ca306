//! Turning a child process outcome into a verdict for one execution mode.
//!
//! Crash and timeout are decided here first and bypass every expectation:
//! a test whose engine segfaulted is CRASH even if it declared a negative
//! expectation. Everything else is judged against the test's metadata.

use crate::engine::{EngineProfile, InvocationStyle};
use crate::metadata::{ExecMode, TestMetadata};
use crate::results::Verdict;
use crate::sandbox::{ExecOutcome, ProcessOutput};

/// Line printed by `$DONE()` (via the done-print handle) on success.
pub const ASYNC_COMPLETE: &str = "Test262:AsyncTestComplete";
/// Prefix printed by `$DONE(err)`; the remainder is the failure message.
pub const ASYNC_FAILURE_PREFIX: &str = "Test262:AsyncTestFailure:";

const STDERR_EXCERPT_MAX: usize = 300;

/// Judgement of one (test, mode) invocation.
#[derive(Debug, Clone)]
pub struct ModeOutcome {
    pub verdict: Verdict,
    pub error_name: Option<String>,
    pub diagnostic: Option<String>,
    pub annotations: Vec<String>,
}

impl ModeOutcome {
    fn pass() -> Self {
        ModeOutcome {
            verdict: Verdict::Pass,
            error_name: None,
            diagnostic: None,
            annotations: Vec::new(),
        }
    }

    fn fail(diagnostic: String) -> Self {
        ModeOutcome {
            verdict: Verdict::Fail,
            error_name: None,
            diagnostic: Some(diagnostic),
            annotations: Vec::new(),
        }
    }
}

/// Error constructor name and message pulled from engine stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub name: String,
    pub message: Option<String>,
}

/// First `$DONE` signal observed on stdout, plus any extras after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoneSignal {
    Completed,
    Failed(String),
}

#[derive(Debug, Default)]
pub struct DoneScan {
    pub first: Option<DoneSignal>,
    pub extra_signals: usize,
}

enum PhaseEvidence {
    PreExecution,
    Runtime,
    Unknown,
}

/// Judge one invocation.
pub fn judge(
    profile: &EngineProfile,
    meta: &TestMetadata,
    mode: ExecMode,
    outcome: &ExecOutcome,
) -> ModeOutcome {
    match outcome {
        ExecOutcome::TimedOut { waited } => {
            let mut diag = format!("no completion within {:.1}s", waited.as_secs_f64());
            if meta.flags.is_async {
                diag.push_str(" while waiting for $DONE");
            }
            ModeOutcome {
                verdict: Verdict::Timeout,
                error_name: None,
                diagnostic: Some(diag),
                annotations: Vec::new(),
            }
        }
        ExecOutcome::SpawnFailed(message) => ModeOutcome {
            verdict: Verdict::Crash,
            error_name: None,
            diagnostic: Some(message.clone()),
            annotations: Vec::new(),
        },
        ExecOutcome::Completed(out) => judge_completed(profile, meta, mode, out),
    }
}

fn judge_completed(
    profile: &EngineProfile,
    meta: &TestMetadata,
    mode: ExecMode,
    out: &ProcessOutput,
) -> ModeOutcome {
    let crashed = out.signal.is_some()
        || match out.code {
            Some(code) => code != 0 && code != profile.failure_exit_code,
            None => true,
        };
    if crashed {
        let mut diag = out.describe_status();
        if let Some(tail) = stderr_excerpt(&out.stderr) {
            diag.push_str("; stderr: ");
            diag.push_str(&tail);
        }
        return ModeOutcome {
            verdict: Verdict::Crash,
            error_name: None,
            diagnostic: Some(diag),
            annotations: Vec::new(),
        };
    }

    let reported_failure = out.code == Some(profile.failure_exit_code);
    if reported_failure {
        return judge_reported_failure(profile, meta, mode, out);
    }

    // Clean exit.
    let mut outcome = if meta.flags.is_async {
        judge_async_completion(meta, out)
    } else {
        match &meta.negative {
            Some(neg) => ModeOutcome::fail(format!(
                "expected {} during {} phase, but test completed normally",
                neg.error_type, neg.phase
            )),
            None => ModeOutcome::pass(),
        }
    };
    // A clean concat-mode exit must have printed the marker; its absence
    // means the scratch file was never evaluated.
    if profile.invocation == InvocationStyle::Concat
        && mode != ExecMode::Raw
        && !marker_present(&out.stdout)
    {
        outcome
            .annotations
            .push("execution marker missing from stdout".to_string());
    }
    outcome
}

fn judge_async_completion(meta: &TestMetadata, out: &ProcessOutput) -> ModeOutcome {
    let scan = scan_done(&out.stdout);
    let mut outcome = match scan.first {
        Some(DoneSignal::Completed) => match &meta.negative {
            Some(neg) => ModeOutcome::fail(format!(
                "expected {} during {} phase, but $DONE signaled completion",
                neg.error_type, neg.phase
            )),
            None => ModeOutcome::pass(),
        },
        Some(DoneSignal::Failed(message)) => {
            let mut failed = ModeOutcome::fail(format!("$DONE reported failure: {message}"));
            failed.error_name = extract_error_report(&message).map(|r| r.name);
            failed
        }
        None => ModeOutcome::fail("engine exited without signaling $DONE".to_string()),
    };
    if scan.extra_signals > 0 {
        outcome.annotations.push(format!(
            "$DONE signaled {} extra time(s); first signal used",
            scan.extra_signals
        ));
    }
    outcome
}

fn judge_reported_failure(
    profile: &EngineProfile,
    meta: &TestMetadata,
    mode: ExecMode,
    out: &ProcessOutput,
) -> ModeOutcome {
    let report = extract_error_report(&out.stderr);
    let evidence = phase_evidence(profile, mode, out);

    let Some(neg) = &meta.negative else {
        let diag = match &report {
            Some(r) => match &r.message {
                Some(message) => format!("{}: {message}", r.name),
                None => r.name.clone(),
            },
            None => stderr_excerpt(&out.stderr)
                .unwrap_or_else(|| "engine reported failure with no diagnostic".to_string()),
        };
        let diag = match evidence {
            PhaseEvidence::PreExecution => format!("rejected before execution: {diag}"),
            _ => diag,
        };
        let mut outcome = ModeOutcome::fail(diag);
        outcome.error_name = report.map(|r| r.name);
        return outcome;
    };

    let mut annotations = Vec::new();
    match evidence {
        PhaseEvidence::PreExecution if !neg.phase.is_pre_execution() => {
            let mut outcome = ModeOutcome::fail(format!(
                "expected {} during {} phase, but the engine rejected the test before execution",
                neg.error_type, neg.phase
            ));
            outcome.error_name = report.map(|r| r.name);
            return outcome;
        }
        PhaseEvidence::Runtime if neg.phase.is_pre_execution() => {
            let mut outcome = ModeOutcome::fail(format!(
                "expected {} during {} phase, but the failure occurred at runtime",
                neg.error_type, neg.phase
            ));
            outcome.error_name = report.map(|r| r.name);
            return outcome;
        }
        PhaseEvidence::Unknown => {
            annotations.push("error phase could not be verified".to_string());
        }
        _ => {}
    }

    let mut outcome = match &report {
        Some(r) if r.name == neg.error_type => ModeOutcome::pass(),
        Some(r) => ModeOutcome::fail(format!(
            "expected {} during {} phase, got {}",
            neg.error_type, neg.phase, r.name
        )),
        None => ModeOutcome::fail(format!(
            "expected {} during {} phase, but could not identify the reported error",
            neg.error_type, neg.phase
        )),
    };
    outcome.error_name = report.map(|r| r.name);
    outcome.annotations = annotations;
    outcome
}

/// Where in the pipeline the failure happened, as far as we can tell.
/// Concatenated runs read the stdout marker; `files` runs match the
/// profile's stderr prefixes; raw runs have no signal either way.
fn phase_evidence(profile: &EngineProfile, mode: ExecMode, out: &ProcessOutput) -> PhaseEvidence {
    match profile.invocation {
        InvocationStyle::Concat => {
            if mode == ExecMode::Raw {
                PhaseEvidence::Unknown
            } else if marker_present(&out.stdout) {
                PhaseEvidence::Runtime
            } else {
                PhaseEvidence::PreExecution
            }
        }
        InvocationStyle::Files => {
            let first = first_significant_line(&out.stderr);
            let matches = |prefix: &Option<String>| {
                prefix
                    .as_deref()
                    .is_some_and(|p| first.is_some_and(|line| line.starts_with(p)))
            };
            if matches(&profile.parse_error_prefix) || matches(&profile.resolution_error_prefix) {
                PhaseEvidence::PreExecution
            } else if profile.has_phase_oracle(mode) {
                PhaseEvidence::Runtime
            } else {
                PhaseEvidence::Unknown
            }
        }
    }
}

/// Whether the injected prologue got far enough to print its marker.
pub fn marker_present(stdout: &str) -> bool {
    stdout
        .lines()
        .any(|line| line.trim() == crate::engine::EXEC_STARTED_MARKER)
}

/// Scan stdout for `$DONE` completion signals.
pub fn scan_done(stdout: &str) -> DoneScan {
    let mut scan = DoneScan::default();
    for line in stdout.lines() {
        let line = line.trim();
        let signal = if line == ASYNC_COMPLETE {
            Some(DoneSignal::Completed)
        } else {
            line.strip_prefix(ASYNC_FAILURE_PREFIX)
                .map(|rest| DoneSignal::Failed(rest.trim().to_string()))
        };
        match signal {
            Some(signal) if scan.first.is_none() => scan.first = Some(signal),
            Some(_) => scan.extra_signals += 1,
            None => {}
        }
    }
    scan
}

/// Pull the first `SomethingError[: message]` line out of stderr, skipping
/// noise lines and common reporting prefixes.
pub fn extract_error_report(stderr: &str) -> Option<ErrorReport> {
    for raw_line in stderr.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        for prefix in ["Uncaught exception:", "Uncaught ", "Exception: "] {
            if let Some(rest) = line.strip_prefix(prefix) {
                line = rest.trim_start();
                break;
            }
        }
        let ident_len = line
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
            .count();
        if ident_len == 0 {
            continue;
        }
        let ident = &line[..ident_len];
        if !ident.ends_with("Error") {
            continue;
        }
        let rest = line[ident_len..].trim_start();
        let message = rest
            .strip_prefix(':')
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        return Some(ErrorReport {
            name: ident.to_string(),
            message,
        });
    }
    None
}

fn first_significant_line(s: &str) -> Option<&str> {
    s.lines().map(str::trim).find(|line| !line.is_empty())
}

fn stderr_excerpt(stderr: &str) -> Option<String> {
    let line = first_significant_line(stderr)?;
    let mut excerpt: String = line.chars().take(STDERR_EXCERPT_MAX).collect();
    if line.chars().count() > STDERR_EXCERPT_MAX {
        excerpt.push_str("...");
    }
    Some(excerpt)
}
