//! Test discovery and the per-test pipeline: metadata, skip policy,
//! prologue resolution, execution across modes, verdict combination.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use walkdir::WalkDir;

use crate::adjudicate::{self, ModeOutcome};
use crate::engine::EngineProfile;
use crate::error::{HarnessError, HarnessResult};
use crate::includes::HarnessKit;
use crate::metadata::{ExecMode, TestMetadata};
use crate::results::{TestRecord, Verdict};
use crate::sandbox::{ExecOutcome, ExecRequest, Sandbox};

/// Restrict which strictness variants of unflagged tests run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    StrictOnly,
    SloppyOnly,
}

/// Everything the pipeline needs, assembled by the caller from config
/// and command line.
#[derive(Debug)]
pub struct PipelineConfig {
    pub suite_root: PathBuf,
    pub profile: EngineProfile,
    pub timeout: Duration,
    pub skip_features: Vec<String>,
    pub only_features: Vec<String>,
    pub ignored_tests: Vec<String>,
    pub known_crashes: Vec<String>,
    pub strictness: Option<Strictness>,
}

/// One executed (mode, outcome, judgement) triple, kept for detailed
/// single-test inspection.
#[derive(Debug)]
pub struct ModeRun {
    pub mode: ExecMode,
    pub outcome: ExecOutcome,
    pub judged: ModeOutcome,
}

/// Full result of one test file.
#[derive(Debug)]
pub struct CaseRun {
    pub record: TestRecord,
    pub runs: Vec<ModeRun>,
}

#[derive(Debug)]
pub struct TestPipeline {
    suite_root: PathBuf,
    test_dir: PathBuf,
    kit: HarnessKit,
    profile: Arc<EngineProfile>,
    timeout: Duration,
    skip_features: Vec<String>,
    only_features: Vec<String>,
    ignored_tests: Vec<String>,
    known_crashes: Vec<String>,
    strictness: Option<Strictness>,
}

impl TestPipeline {
    pub fn new(config: PipelineConfig) -> HarnessResult<Self> {
        if !config.suite_root.is_dir() {
            return Err(HarnessError::SuiteNotFound(config.suite_root));
        }
        config.profile.validate()?;
        let kit = HarnessKit::load(&config.suite_root)?;
        let test_dir = config.suite_root.join("test");
        Ok(TestPipeline {
            suite_root: config.suite_root,
            test_dir,
            kit,
            profile: Arc::new(config.profile),
            timeout: config.timeout,
            skip_features: config.skip_features,
            only_features: config.only_features,
            ignored_tests: config.ignored_tests,
            known_crashes: config.known_crashes,
            strictness: config.strictness,
        })
    }

    pub fn profile_arc(&self) -> Arc<EngineProfile> {
        Arc::clone(&self.profile)
    }

    pub fn suite_root(&self) -> &Path {
        &self.suite_root
    }

    /// Collect test files. `selections` are paths under the suite's
    /// `test/` directory (or absolute); empty means the whole tree.
    /// Output is sorted, deduplicated, and optionally capped.
    pub fn discover(
        &self,
        selections: &[String],
        filter: Option<&str>,
        max: Option<usize>,
    ) -> HarnessResult<Vec<PathBuf>> {
        let mut found = Vec::new();
        if selections.is_empty() {
            if !self.test_dir.is_dir() {
                return Err(HarnessError::SuiteNotFound(self.test_dir.clone()));
            }
            collect_tree(&self.test_dir, &mut found);
        } else {
            for selection in selections {
                let candidate = if Path::new(selection).is_absolute() {
                    PathBuf::from(selection)
                } else {
                    self.test_dir.join(selection)
                };
                if candidate.is_file() {
                    if is_test_file(&candidate) {
                        found.push(candidate);
                    }
                } else if candidate.is_dir() {
                    collect_tree(&candidate, &mut found);
                } else {
                    return Err(HarnessError::TestPathNotFound(candidate));
                }
            }
        }
        if let Some(pattern) = filter {
            found.retain(|p| p.to_string_lossy().contains(pattern));
        }
        found.sort();
        found.dedup();
        if let Some(max) = max {
            found.truncate(max);
        }
        Ok(found)
    }

    /// Run one test file across all applicable modes. The only error is
    /// an unresolved harness include, which aborts the whole run; every
    /// per-test problem becomes a verdict instead.
    pub async fn run_case(&self, sandbox: &Sandbox, path: &Path) -> HarnessResult<CaseRun> {
        let started = Instant::now();
        let rel = self.relative_name(path);

        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                return Ok(skip_case(
                    rel,
                    Vec::new(),
                    format!("unreadable test file: {e}"),
                    started,
                ));
            }
        };

        let meta = match TestMetadata::parse(&source) {
            Ok(meta) => meta,
            Err(e) => {
                return Ok(skip_case(
                    rel,
                    Vec::new(),
                    format!("metadata error: {e}"),
                    started,
                ));
            }
        };

        if let Some(reason) = self.skip_reason(&rel, &meta) {
            return Ok(skip_case(rel, meta.features.clone(), reason, started));
        }

        let prologue = self.kit.prologue(&meta)?;

        let modes: Vec<ExecMode> = meta
            .execution_modes()
            .into_iter()
            .filter(|mode| match self.strictness {
                Some(Strictness::StrictOnly) => *mode != ExecMode::Sloppy,
                Some(Strictness::SloppyOnly) => *mode != ExecMode::Strict,
                None => true,
            })
            .collect();
        if modes.is_empty() {
            return Ok(skip_case(
                rel,
                meta.features.clone(),
                "excluded by strictness filter".to_string(),
                started,
            ));
        }

        let body = if meta.flags.raw {
            source.as_str()
        } else {
            crate::metadata::body(&source)
        };

        let mut runs = Vec::new();
        let mut annotations = Vec::new();
        for mode in modes {
            let request = ExecRequest {
                test_path: path,
                body,
                prologue: &prologue,
                mode,
                can_block: meta.flags.can_block,
                deadline: self.timeout,
            };
            let outcome = sandbox.execute(&request).await;
            let judged = adjudicate::judge(&self.profile, &meta, mode, &outcome);
            annotations.extend(judged.annotations.iter().cloned());
            let decisive = judged.verdict != Verdict::Pass;
            runs.push(ModeRun {
                mode,
                outcome,
                judged,
            });
            if decisive {
                break;
            }
        }

        let last = runs.last().map(|r| &r.judged);
        let verdict = last.map(|j| j.verdict).unwrap_or(Verdict::Pass);
        let record = TestRecord {
            path: rel,
            verdict,
            duration_ms: started.elapsed().as_millis() as u64,
            mode: (verdict != Verdict::Pass)
                .then(|| runs.last().map(|r| r.mode.to_string()))
                .flatten(),
            error: last.and_then(|j| j.diagnostic.clone()),
            error_name: last.and_then(|j| j.error_name.clone()),
            features: meta.features.clone(),
            annotations,
        };
        Ok(CaseRun { record, runs })
    }

    /// `run_case` on a fresh current-thread runtime, for single-test use
    /// outside the worker pool.
    pub fn run_case_blocking(&self, path: &Path) -> HarnessResult<CaseRun> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let sandbox = Sandbox::new(self.profile_arc(), 0)?;
        runtime.block_on(self.run_case(&sandbox, path))
    }

    fn skip_reason(&self, rel: &str, meta: &TestMetadata) -> Option<String> {
        if self.ignored_tests.iter().any(|p| rel.contains(p.as_str())) {
            return Some("ignored by configuration".to_string());
        }
        if self.known_crashes.iter().any(|p| rel.contains(p.as_str())) {
            return Some("known engine crash".to_string());
        }
        if !self.only_features.is_empty()
            && !meta
                .features
                .iter()
                .any(|f| self.only_features.contains(f))
        {
            return Some("outside the selected feature set".to_string());
        }
        for feature in &meta.features {
            if self.skip_features.contains(feature) {
                return Some(format!("feature '{feature}' is skipped by configuration"));
            }
        }
        if !self.profile.features.is_empty() {
            for feature in &meta.features {
                if !self.profile.features.contains(feature) {
                    return Some(format!(
                        "feature '{feature}' not supported by engine profile"
                    ));
                }
            }
        }
        if let Some(missing) = self.profile.missing_capability(meta) {
            return Some(format!("engine lacks {missing}"));
        }
        None
    }

    /// Suite-relative identity with forward slashes, stable across
    /// machines for baselines and reports.
    fn relative_name(&self, path: &Path) -> String {
        let rel = path
            .strip_prefix(&self.test_dir)
            .or_else(|_| path.strip_prefix(&self.suite_root))
            .unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn collect_tree(dir: &Path, found: &mut Vec<PathBuf>) {
    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        if is_test_file(entry.path()) {
            found.push(entry.path().to_path_buf());
        }
    }
}

/// Runnable test files: `.js`, not a `_FIXTURE` module, not a hidden
/// scratch or editor file.
fn is_test_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".js") && !name.contains("_FIXTURE") && !name.starts_with('.')
}

fn skip_case(path: String, features: Vec<String>, reason: String, started: Instant) -> CaseRun {
    CaseRun {
        record: TestRecord {
            path,
            verdict: Verdict::Skip,
            duration_ms: started.elapsed().as_millis() as u64,
            mode: None,
            error: Some(reason),
            error_name: None,
            features,
            annotations: Vec::new(),
        },
        runs: Vec::new(),
    }
}
