//! Comparison of two saved reports, for before/after checks across
//! engine changes without a maintained baseline file.

use std::collections::HashMap;
use std::path::Path;

use colored::Colorize;

use crate::error::HarnessResult;
use crate::report::Report;
use crate::results::Verdict;

#[derive(Debug, Default)]
pub struct RunComparison {
    /// Failing before, passing now.
    pub fixed: Vec<String>,
    /// Passing before, failing now.
    pub broken: Vec<String>,
    /// Crashing now but not before.
    pub new_crashes: Vec<String>,
    /// Crashing before but not now.
    pub fixed_crashes: Vec<String>,
    pub pass_delta: i64,
    pub fail_delta: i64,
    pub base_pass_rate: f64,
    pub new_pass_rate: f64,
}

impl RunComparison {
    pub fn compare(base: &Report, new: &Report) -> Self {
        let base_verdicts: HashMap<&str, Verdict> = base
            .results
            .iter()
            .map(|r| (r.path.as_str(), r.verdict))
            .collect();
        let new_verdicts: HashMap<&str, Verdict> = new
            .results
            .iter()
            .map(|r| (r.path.as_str(), r.verdict))
            .collect();

        let mut comparison = RunComparison {
            pass_delta: new.totals.passed as i64 - base.totals.passed as i64,
            fail_delta: new.totals.failed as i64 - base.totals.failed as i64,
            base_pass_rate: base.totals.pass_rate,
            new_pass_rate: new.totals.pass_rate,
            ..RunComparison::default()
        };

        for (path, new_verdict) in &new_verdicts {
            let Some(base_verdict) = base_verdicts.get(path) else {
                continue;
            };
            if *base_verdict == *new_verdict {
                continue;
            }
            match (*base_verdict, *new_verdict) {
                (v, Verdict::Pass) if v.is_failure() => comparison.fixed.push(path.to_string()),
                (Verdict::Pass, v) if v.is_failure() => comparison.broken.push(path.to_string()),
                _ => {}
            }
            if *new_verdict == Verdict::Crash && *base_verdict != Verdict::Crash {
                comparison.new_crashes.push(path.to_string());
            }
            if *base_verdict == Verdict::Crash && *new_verdict != Verdict::Crash {
                comparison.fixed_crashes.push(path.to_string());
            }
        }
        comparison.fixed.sort();
        comparison.broken.sort();
        comparison.new_crashes.sort();
        comparison.fixed_crashes.sort();
        comparison
    }

    pub fn compare_files(base: &Path, new: &Path) -> HarnessResult<Self> {
        let base_report = Report::load(base)?;
        let new_report = Report::load(new)?;
        Ok(Self::compare(&base_report, &new_report))
    }

    /// True when the new run is no worse than the base run.
    pub fn is_clean(&self) -> bool {
        self.broken.is_empty() && self.new_crashes.is_empty()
    }

    pub fn print(&self) {
        println!("\n=== Run Comparison ===");
        println!(
            "Pass rate: {:.2}% -> {:.2}% ({})",
            self.base_pass_rate,
            self.new_pass_rate,
            signed(self.pass_delta)
        );

        if !self.fixed.is_empty() {
            println!("\n{} ({}):", "Fixed".green().bold(), self.fixed.len());
            for path in self.fixed.iter().take(20) {
                println!("  {}", path.green());
            }
            if self.fixed.len() > 20 {
                println!("  ... and {} more", self.fixed.len() - 20);
            }
        }

        if !self.broken.is_empty() {
            println!("\n{} ({}):", "Broken".red().bold(), self.broken.len());
            for path in self.broken.iter().take(20) {
                println!("  {}", path.red());
            }
            if self.broken.len() > 20 {
                println!("  ... and {} more", self.broken.len() - 20);
            }
        }

        if !self.new_crashes.is_empty() {
            println!(
                "\n{} ({}):",
                "New crashes".red().bold(),
                self.new_crashes.len()
            );
            for path in self.new_crashes.iter().take(10) {
                println!("  {}", path.red());
            }
        }

        if !self.fixed_crashes.is_empty() {
            println!(
                "\n{} ({}):",
                "Fixed crashes".green().bold(),
                self.fixed_crashes.len()
            );
            for path in self.fixed_crashes.iter().take(10) {
                println!("  {}", path.green());
            }
        }

        if self.fixed.is_empty() && self.broken.is_empty() && self.new_crashes.is_empty() {
            println!("\nNo verdict changes.");
        }
    }
}

fn signed(n: i64) -> String {
    if n >= 0 { format!("+{n}") } else { n.to_string() }
}
