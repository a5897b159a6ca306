//! Conformance test harness for test262-style JavaScript corpora.
//!
//! The harness treats the engine under test as a black box: every test
//! runs in its own engine subprocess, and verdicts are derived from exit
//! status, stdout, and stderr alone. The crate is organized as a
//! pipeline:
//!
//! - [`metadata`]: frontmatter parsing and execution-mode derivation
//! - [`includes`]: harness file resolution and prologue assembly
//! - [`engine`] / [`sandbox`]: engine profiles and contained execution
//! - [`adjudicate`]: outcome-to-verdict rules, negative expectations,
//!   async completion
//! - [`results`] / [`report`]: records, aggregation, persisted reports
//! - [`baseline`] / [`compare`]: regression classification across runs
//! - [`runner`] / [`pool`]: discovery, per-test pipeline, worker pool

#![warn(clippy::all)]

pub mod adjudicate;
pub mod baseline;
pub mod compare;
pub mod config;
pub mod engine;
pub mod error;
pub mod includes;
pub mod metadata;
pub mod pool;
pub mod report;
pub mod results;
pub mod runner;
pub mod sandbox;

pub use baseline::{Baseline, BaselineDelta, DeltaClass};
pub use compare::RunComparison;
pub use config::HarnessConfig;
pub use engine::{EngineProfile, InvocationStyle};
pub use error::{HarnessError, HarnessResult};
pub use includes::HarnessKit;
pub use metadata::{ErrorPhase, ExecMode, TestFlags, TestMetadata};
pub use pool::{PoolConfig, resolve_jobs, run_pool};
pub use report::{Report, RunSummary};
pub use results::{ResultSet, TestRecord, Verdict};
pub use runner::{CaseRun, PipelineConfig, Strictness, TestPipeline};
pub use sandbox::{ExecOutcome, Sandbox};
