//! Error types shared across the harness.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a run (or a subcommand) rather than failing a
/// single test. Per-test problems are folded into the test's verdict
/// instead and never surface here.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("harness include '{name}' not found in {}", dir.display())]
    UnresolvedInclude { name: String, dir: PathBuf },

    #[error("harness directory not found: {}", .0.display())]
    HarnessDirMissing(PathBuf),

    #[error("test suite directory not found: {}", .0.display())]
    SuiteNotFound(PathBuf),

    #[error("test path not found: {}", .0.display())]
    TestPathNotFound(PathBuf),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("engine profile '{0}' is not defined")]
    UnknownEngine(String),

    #[error("baseline file {}: {reason}", path.display())]
    Baseline { path: PathBuf, reason: String },

    #[error("report file {}: {reason}", path.display())]
    Report { path: PathBuf, reason: String },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;

impl HarnessError {
    /// Process exit code for an aborted run. All variants are
    /// configuration-class problems, distinct from test failures.
    pub fn exit_code(&self) -> i32 {
        2
    }
}
