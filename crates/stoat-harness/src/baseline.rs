//! Baseline expectations: the known-good verdict for each test, used to
//! separate regressions from long-standing failures.
//!
//! The baseline file is a JSON object mapping suite-relative paths to
//! expected verdicts. Absent paths are expected to pass, so a fresh
//! engine starts from an empty file and only failures are listed. A run
//! never writes the baseline; updating it is an explicit subcommand.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use colored::Colorize;

use crate::error::{HarnessError, HarnessResult};
use crate::report::Report;
use crate::results::{TestRecord, Verdict};

#[derive(Debug, Default)]
pub struct Baseline {
    expected: HashMap<String, Verdict>,
}

/// How one result relates to its baseline expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaClass {
    /// Expected PASS, got a failure.
    Regression,
    /// Expected a failure, got PASS.
    Fixed,
    /// Expected one failure kind, got a different one.
    Shifted,
    /// Failure matching the baseline.
    UnchangedFailure,
}

#[derive(Debug, Clone)]
pub struct DeltaEntry {
    pub path: String,
    pub expected: Verdict,
    pub actual: Verdict,
}

/// Classified differences between a run and its baseline.
#[derive(Debug, Default)]
pub struct BaselineDelta {
    pub regressions: Vec<DeltaEntry>,
    pub fixed: Vec<DeltaEntry>,
    pub shifted: Vec<DeltaEntry>,
    pub unchanged_failures: usize,
}

impl Baseline {
    pub fn empty() -> Self {
        Baseline::default()
    }

    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| HarnessError::Baseline {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let expected: HashMap<String, Verdict> =
            serde_json::from_str(&content).map_err(|e| HarnessError::Baseline {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Baseline { expected })
    }

    /// Build a baseline from a finished run: every executed failure is
    /// recorded, passes and skips are left implicit.
    pub fn from_report(report: &Report) -> Self {
        let mut expected = HashMap::new();
        for record in &report.results {
            if record.verdict.is_failure() {
                expected.insert(record.path.clone(), record.verdict);
            }
        }
        Baseline { expected }
    }

    pub fn save(&self, path: &Path) -> HarnessResult<()> {
        let sorted: BTreeMap<&String, &Verdict> = self.expected.iter().collect();
        let json = serde_json::to_string_pretty(&sorted).map_err(|e| HarnessError::Baseline {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        fs::write(path, json).map_err(|source| HarnessError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn len(&self) -> usize {
        self.expected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }

    /// Expected verdict for a path; unlisted paths are expected to pass.
    pub fn expected_for(&self, path: &str) -> Verdict {
        self.expected.get(path).copied().unwrap_or(Verdict::Pass)
    }

    /// Classify a run's records against this baseline. Skipped tests
    /// measured nothing and are left out.
    pub fn classify(&self, records: &[TestRecord]) -> BaselineDelta {
        let mut delta = BaselineDelta::default();
        for record in records {
            if record.verdict == Verdict::Skip {
                continue;
            }
            let expected = self.expected_for(&record.path);
            let actual = record.verdict;
            if expected == actual {
                if actual != Verdict::Pass {
                    delta.unchanged_failures += 1;
                }
                continue;
            }
            let entry = DeltaEntry {
                path: record.path.clone(),
                expected,
                actual,
            };
            match (expected, actual) {
                (Verdict::Pass, _) => delta.regressions.push(entry),
                (_, Verdict::Pass) => delta.fixed.push(entry),
                _ => delta.shifted.push(entry),
            }
        }
        delta
    }
}

impl BaselineDelta {
    pub fn has_changes(&self) -> bool {
        !self.regressions.is_empty() || !self.fixed.is_empty() || !self.shifted.is_empty()
    }

    pub fn print(&self) {
        println!("\n=== Baseline Comparison ===");
        println!(
            "Regressions: {}",
            if self.regressions.is_empty() {
                "0".normal()
            } else {
                self.regressions.len().to_string().red().bold()
            }
        );
        println!(
            "Fixed:       {}",
            if self.fixed.is_empty() {
                "0".normal()
            } else {
                self.fixed.len().to_string().green()
            }
        );
        println!(
            "Shifted:     {}",
            if self.shifted.is_empty() {
                "0".normal()
            } else {
                self.shifted.len().to_string().yellow()
            }
        );
        println!("Unchanged failures: {}", self.unchanged_failures);

        print_entries("Regressions", &self.regressions, 20, |e| {
            format!("{} (expected {}, got {})", e.path, e.expected, e.actual).red()
        });
        print_entries("Fixed", &self.fixed, 10, |e| {
            format!("{} (was {})", e.path, e.expected).green()
        });
        print_entries("Shifted", &self.shifted, 10, |e| {
            format!("{} ({} -> {})", e.path, e.expected, e.actual).yellow()
        });
    }
}

fn print_entries(
    label: &str,
    entries: &[DeltaEntry],
    cap: usize,
    line: impl Fn(&DeltaEntry) -> colored::ColoredString,
) {
    if entries.is_empty() {
        return;
    }
    println!("\n{label}:");
    for entry in entries.iter().take(cap) {
        println!("  {}", line(entry));
    }
    if entries.len() > cap {
        println!("  ... and {} more", entries.len() - cap);
    }
}
