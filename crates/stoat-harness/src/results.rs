//! Per-test verdicts and the aggregated result set of a run.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Final verdict for one test file, all execution modes combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// Every applicable mode met its expectation.
    Pass,
    /// The engine produced a wrong result: unexpected error, missing
    /// expected error, or a mismatched negative expectation.
    Fail,
    /// An invocation exceeded its deadline and was killed.
    Timeout,
    /// The engine died abnormally: signal, panic-style abort, or an exit
    /// code outside the reporting convention.
    Crash,
    /// Not executed, with the reason recorded in the diagnostic.
    Skip,
}

impl Verdict {
    /// Counts against the pass rate. Skipped tests measure nothing.
    pub fn is_failure(self) -> bool {
        matches!(self, Verdict::Fail | Verdict::Timeout | Verdict::Crash)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
            Verdict::Timeout => write!(f, "TIMEOUT"),
            Verdict::Crash => write!(f, "CRASH"),
            Verdict::Skip => write!(f, "SKIP"),
        }
    }
}

/// One test's result. `path` is suite-relative with forward slashes and
/// identifies the test across runs and machines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    pub path: String,
    pub verdict: Verdict,
    pub duration_ms: u64,
    /// Mode whose outcome decided a non-pass verdict.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mode: Option<String>,
    /// Human-readable diagnostic: assertion message, stderr excerpt,
    /// expectation mismatch, or skip reason.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    /// Error constructor name extracted from the engine's report.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub features: Vec<String>,
    /// Protocol irregularities that did not change the verdict, such as
    /// extra `$DONE` invocations.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub annotations: Vec<String>,
}

/// All records of one run, in completion order, one per test path.
#[derive(Debug, Default)]
pub struct ResultSet {
    records: Vec<TestRecord>,
    seen: HashSet<String>,
}

impl ResultSet {
    pub fn new() -> Self {
        ResultSet::default()
    }

    /// Insert a record. Returns false (and keeps the first record) if the
    /// path was already recorded; the scheduler hands out each path once,
    /// so a duplicate is a harness bug worth surfacing.
    pub fn insert(&mut self, record: TestRecord) -> bool {
        if !self.seen.insert(record.path.clone()) {
            tracing::error!(path = %record.path, "duplicate test record dropped");
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn records(&self) -> &[TestRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<TestRecord> {
        self.records
    }
}
