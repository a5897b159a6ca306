//! Run aggregation: live counters while a run is in flight, and the
//! serialized report written at the end.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::results::{ResultSet, TestRecord, Verdict};

/// Per-feature verdict counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureBreakdown {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timeout: usize,
    pub crashed: usize,
}

impl FeatureBreakdown {
    fn record(&mut self, verdict: Verdict) {
        self.total += 1;
        match verdict {
            Verdict::Pass => self.passed += 1,
            Verdict::Fail => self.failed += 1,
            Verdict::Skip => self.skipped += 1,
            Verdict::Timeout => self.timeout += 1,
            Verdict::Crash => self.crashed += 1,
        }
    }

    pub fn failing(&self) -> usize {
        self.failed + self.timeout + self.crashed
    }
}

/// A non-pass result retained for the end-of-run listing.
#[derive(Debug, Clone)]
pub struct FailureDetail {
    pub path: String,
    pub verdict: Verdict,
    pub mode: Option<String>,
    pub error: Option<String>,
}

/// Live aggregation of one run.
#[derive(Debug)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timeout: usize,
    pub crashed: usize,
    pub duration: Duration,
    by_feature: HashMap<String, FeatureBreakdown>,
    failures: Vec<FailureDetail>,
    max_failures: usize,
}

impl RunSummary {
    /// `max_failures` caps how many failure details are retained for the
    /// human listing; counters always cover everything.
    pub fn new(max_failures: usize) -> Self {
        RunSummary {
            total: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            timeout: 0,
            crashed: 0,
            duration: Duration::ZERO,
            by_feature: HashMap::new(),
            failures: Vec::new(),
            max_failures,
        }
    }

    pub fn record(&mut self, record: &TestRecord) {
        self.total += 1;
        match record.verdict {
            Verdict::Pass => self.passed += 1,
            Verdict::Fail => self.failed += 1,
            Verdict::Skip => self.skipped += 1,
            Verdict::Timeout => self.timeout += 1,
            Verdict::Crash => self.crashed += 1,
        }
        for feature in &record.features {
            self.by_feature
                .entry(feature.clone())
                .or_default()
                .record(record.verdict);
        }
        if record.verdict.is_failure() && self.failures.len() < self.max_failures {
            self.failures.push(FailureDetail {
                path: record.path.clone(),
                verdict: record.verdict,
                mode: record.mode.clone(),
                error: record.error.clone(),
            });
        }
    }

    /// Tests that actually ran.
    pub fn executed(&self) -> usize {
        self.total - self.skipped
    }

    /// Percentage of executed tests that passed.
    pub fn pass_rate(&self) -> f64 {
        if self.executed() == 0 {
            0.0
        } else {
            self.passed as f64 / self.executed() as f64 * 100.0
        }
    }

    pub fn failures(&self) -> &[FailureDetail] {
        &self.failures
    }

    pub fn by_feature(&self) -> &HashMap<String, FeatureBreakdown> {
        &self.by_feature
    }

    pub fn print_summary(&self) {
        println!("\n=== Conformance Results ===");
        println!("Total:    {}", self.total);
        println!(
            "Passed:   {} ({:.2}%)",
            self.passed.to_string().green(),
            self.pass_rate()
        );
        println!("Failed:   {}", paint_nonzero(self.failed, |s| s.red()));
        println!("Timeout:  {}", paint_nonzero(self.timeout, |s| s.magenta()));
        println!(
            "Crashed:  {}",
            paint_nonzero(self.crashed, |s| s.red().bold())
        );
        println!("Skipped:  {}", paint_nonzero(self.skipped, |s| s.yellow()));
        println!("Duration: {:.2}s", self.duration.as_secs_f64());

        let mut failing: Vec<(&String, &FeatureBreakdown)> = self
            .by_feature
            .iter()
            .filter(|(_, b)| b.failing() > 0)
            .collect();
        if !failing.is_empty() {
            failing.sort_by(|a, b| b.1.failing().cmp(&a.1.failing()).then(a.0.cmp(b.0)));
            println!("\nFeatures with failures:");
            for (name, breakdown) in failing.iter().take(10) {
                println!(
                    "  {}: {}/{} failing",
                    name.cyan(),
                    breakdown.failing(),
                    breakdown.total
                );
            }
            if failing.len() > 10 {
                println!("  ... and {} more", failing.len() - 10);
            }
        }

        if !self.failures.is_empty() {
            let total_bad = self.failed + self.timeout + self.crashed;
            println!(
                "\nFailures (showing {} of {}):",
                self.failures.len(),
                total_bad
            );
            for failure in &self.failures {
                let tag = match failure.verdict {
                    Verdict::Fail => "FAIL".red(),
                    Verdict::Timeout => "TIMEOUT".magenta(),
                    Verdict::Crash => "CRASH".red().bold(),
                    other => other.to_string().normal(),
                };
                let mode = failure
                    .mode
                    .as_ref()
                    .map(|m| format!(" [{m}]"))
                    .unwrap_or_default();
                match &failure.error {
                    Some(error) => println!("  {tag} {}{mode}: {error}", failure.path),
                    None => println!("  {tag} {}{mode}", failure.path),
                }
            }
        }
    }
}

fn paint_nonzero(
    n: usize,
    paint: impl Fn(colored::ColoredString) -> colored::ColoredString,
) -> String {
    if n > 0 {
        paint(n.to_string().normal()).to_string()
    } else {
        n.to_string()
    }
}

/// Counter block of a persisted report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Totals {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timeout: usize,
    pub crashed: usize,
    pub pass_rate: f64,
    pub duration_secs: f64,
}

/// Machine-readable report of one run, stable across serialization.
#[derive(Debug, Serialize, Deserialize)]
pub struct Report {
    pub created: DateTime<Utc>,
    pub engine: String,
    pub suite: String,
    pub totals: Totals,
    pub by_feature: BTreeMap<String, FeatureBreakdown>,
    pub results: Vec<TestRecord>,
}

impl Report {
    pub fn build(summary: &RunSummary, results: &ResultSet, engine: &str, suite: &str) -> Self {
        Report {
            created: Utc::now(),
            engine: engine.to_string(),
            suite: suite.to_string(),
            totals: Totals {
                total: summary.total,
                passed: summary.passed,
                failed: summary.failed,
                skipped: summary.skipped,
                timeout: summary.timeout,
                crashed: summary.crashed,
                pass_rate: summary.pass_rate(),
                duration_secs: summary.duration.as_secs_f64(),
            },
            by_feature: summary
                .by_feature
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            results: results.records().to_vec(),
        }
    }

    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| HarnessError::Report {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| HarnessError::Report {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> HarnessResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| HarnessError::Write {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| HarnessError::Report {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        fs::write(path, json).map_err(|source| HarnessError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
