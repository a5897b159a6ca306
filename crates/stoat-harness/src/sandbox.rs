//! Sandboxed execution of a single test invocation.
//!
//! Each invocation is one child process. Engine bugs are contained by the
//! process boundary: a hang is killed at the deadline, a crash shows up
//! as an abnormal exit status, and neither can take the run down.

use std::cell::Cell;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;

use crate::engine::{EngineProfile, InvocationStyle};
use crate::error::HarnessResult;
use crate::includes::PrologueUnit;
use crate::metadata::ExecMode;

const SCRATCH_PREFIX: &str = "stoat-scratch";

/// Everything needed to run one (test, mode) pair.
#[derive(Debug)]
pub struct ExecRequest<'a> {
    /// Absolute path of the test file in the corpus.
    pub test_path: &'a Path,
    /// Test source. Frontmatter-stripped except for raw tests.
    pub body: &'a str,
    pub prologue: &'a [PrologueUnit],
    pub mode: ExecMode,
    /// From the CanBlockIs* flags; `Some(false)` asks the engine to run
    /// a non-blocking agent.
    pub can_block: Option<bool>,
    pub deadline: Duration,
}

/// What happened to the child process.
#[derive(Debug)]
pub enum ExecOutcome {
    Completed(ProcessOutput),
    TimedOut { waited: Duration },
    SpawnFailed(String),
}

/// Captured exit state and streams of a completed child.
#[derive(Debug)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    fn from_output(out: std::process::Output) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&out.status);
        #[cfg(not(unix))]
        let signal = None;
        ProcessOutput {
            code: out.status.code(),
            signal,
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        }
    }

    pub fn describe_status(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exit code {code}"),
            (None, Some(signal)) => format!("killed by signal {signal}"),
            (None, None) => "unknown exit status".to_string(),
        }
    }
}

/// Per-worker sandbox owning a scratch directory for staged sources.
/// The directory is removed on drop; module scratch files written beside
/// their test (so relative fixture imports resolve) are removed as soon
/// as the invocation finishes.
#[derive(Debug)]
pub struct Sandbox {
    profile: Arc<EngineProfile>,
    dir: PathBuf,
    bootstrap_path: Option<PathBuf>,
    worker: usize,
    serial: Cell<u64>,
}

struct ScratchFile {
    path: PathBuf,
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

struct CommandPlan {
    args: Vec<OsString>,
    _scratch: Option<ScratchFile>,
}

impl Sandbox {
    pub fn new(profile: Arc<EngineProfile>, worker: usize) -> HarnessResult<Self> {
        let dir = std::env::temp_dir().join(format!(
            "{SCRATCH_PREFIX}-{}-{worker}",
            std::process::id()
        ));
        fs::create_dir_all(&dir)?;
        let bootstrap_path = match (&profile.bootstrap, profile.invocation) {
            (Some(source), InvocationStyle::Files) => {
                let path = dir.join("bootstrap.js");
                fs::write(&path, source)?;
                Some(path)
            }
            _ => None,
        };
        Ok(Sandbox {
            profile,
            dir,
            bootstrap_path,
            worker,
            serial: Cell::new(0),
        })
    }

    pub fn profile(&self) -> &EngineProfile {
        &self.profile
    }

    /// Run one invocation to completion, the deadline, or a spawn error.
    /// The child is killed if the deadline fires first.
    pub async fn execute(&self, req: &ExecRequest<'_>) -> ExecOutcome {
        let plan = match self.plan(req) {
            Ok(plan) => plan,
            Err(e) => return ExecOutcome::SpawnFailed(format!("failed to stage test: {e}")),
        };
        let mut cmd = Command::new(&self.profile.binary);
        cmd.args(&self.profile.args)
            .args(&plan.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecOutcome::SpawnFailed(format!(
                    "failed to spawn {}: {e}",
                    self.profile.binary.display()
                ));
            }
        };
        match tokio::time::timeout(req.deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => ExecOutcome::Completed(ProcessOutput::from_output(output)),
            Ok(Err(e)) => ExecOutcome::SpawnFailed(format!("failed waiting for engine: {e}")),
            Err(_) => ExecOutcome::TimedOut {
                waited: req.deadline,
            },
        }
    }

    fn plan(&self, req: &ExecRequest<'_>) -> std::io::Result<CommandPlan> {
        match self.profile.invocation {
            InvocationStyle::Concat => self.plan_concat(req),
            InvocationStyle::Files => Ok(self.plan_files(req)),
        }
    }

    fn plan_concat(&self, req: &ExecRequest<'_>) -> std::io::Result<CommandPlan> {
        let script = concat_source(&self.profile, req);
        let serial = self.serial.get();
        self.serial.set(serial + 1);
        let scratch_path = if req.mode == ExecMode::Module {
            // The name must be unique across workers: siblings from one
            // directory run on different workers at the same time, and
            // every worker counts serials from zero.
            let parent = req.test_path.parent().unwrap_or(Path::new("."));
            parent.join(format!(
                ".{SCRATCH_PREFIX}-{}-{}-{serial}.js",
                std::process::id(),
                self.worker
            ))
        } else {
            self.dir.join(format!("case-{serial}.js"))
        };
        fs::write(&scratch_path, &script)?;
        let scratch = ScratchFile {
            path: scratch_path.clone(),
        };
        let mut args: Vec<OsString> = Vec::new();
        if req.mode == ExecMode::Module {
            if let Some(flag) = &self.profile.module_flag {
                args.push(flag.into());
            }
        }
        self.push_can_block_flag(req, &mut args);
        args.push(scratch_path.into_os_string());
        Ok(CommandPlan {
            args,
            _scratch: Some(scratch),
        })
    }

    fn plan_files(&self, req: &ExecRequest<'_>) -> CommandPlan {
        let mut args: Vec<OsString> = Vec::new();
        if req.mode != ExecMode::Raw {
            if let Some(path) = &self.bootstrap_path {
                args.push(path.clone().into_os_string());
            }
            for unit in req.prologue {
                args.push(unit.path.clone().into_os_string());
            }
        }
        match req.mode {
            ExecMode::Strict => {
                if let Some(flag) = &self.profile.strict_flag {
                    args.push(flag.into());
                }
            }
            ExecMode::Sloppy => {
                if let Some(flag) = &self.profile.sloppy_flag {
                    args.push(flag.into());
                }
            }
            ExecMode::Module => {
                if let Some(flag) = &self.profile.module_flag {
                    args.push(flag.into());
                }
            }
            ExecMode::Raw => {}
        }
        self.push_can_block_flag(req, &mut args);
        args.push(req.test_path.to_path_buf().into_os_string());
        CommandPlan {
            args,
            _scratch: None,
        }
    }

    fn push_can_block_flag(&self, req: &ExecRequest<'_>, args: &mut Vec<OsString>) {
        if req.can_block == Some(false) {
            if let Some(flag) = &self.profile.can_block_flag {
                args.push(flag.into());
            }
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

/// Assemble the single-file form: strict directive, bootstrap, harness
/// prologue, execution-started marker, then the body. Raw sources pass
/// through untouched.
fn concat_source(profile: &EngineProfile, req: &ExecRequest<'_>) -> String {
    if req.mode == ExecMode::Raw {
        return req.body.to_string();
    }
    let mut script = String::new();
    if req.mode == ExecMode::Strict {
        script.push_str("\"use strict\";\n");
    }
    if let Some(bootstrap) = &profile.bootstrap {
        script.push_str(bootstrap);
        script.push('\n');
    }
    for unit in req.prologue {
        script.push_str(&unit.source);
        script.push('\n');
    }
    script.push_str(&profile.sentinel_statement());
    script.push('\n');
    script.push_str(req.body);
    script
}
