//! TOML configuration: suite location, engine profiles, skip lists.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::engine::EngineProfile;
use crate::error::{HarnessError, HarnessResult};

/// Looked for in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "stoat.toml";

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Corpus root containing `test/` and `harness/`.
    pub suite_dir: Option<PathBuf>,

    /// Per-invocation deadline in seconds.
    pub timeout_secs: u64,

    /// Worker count; 0 means one per CPU.
    pub jobs: usize,

    /// Tests whose `features:` intersect this list are skipped.
    pub skip_features: Vec<String>,

    /// Path substrings to skip entirely.
    pub ignored_tests: Vec<String>,

    /// Path substrings of tests known to crash the engine; skipped so a
    /// run can finish while the crashes are being worked on.
    pub known_crashes: Vec<String>,

    /// Directory for auto-named report files.
    pub results_dir: Option<PathBuf>,

    /// Default baseline file for regression classification.
    pub baseline: Option<PathBuf>,

    /// Engine profile used when `--engine` is not given.
    pub default_engine: Option<String>,

    /// Named engine profiles, `[engines.<name>]` tables.
    pub engines: HashMap<String, EngineProfile>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            suite_dir: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            jobs: 0,
            skip_features: Vec::new(),
            ignored_tests: Vec::new(),
            known_crashes: Vec::new(),
            results_dir: None,
            baseline: None,
            default_engine: None,
            engines: HashMap::new(),
        }
    }
}

impl HarnessConfig {
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut config: HarnessConfig = toml::from_str(&content).map_err(|e| {
            HarnessError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        for (name, profile) in &mut config.engines {
            profile.name = name.clone();
        }
        Ok(config)
    }

    /// An explicit path must load; without one, a `stoat.toml` in the
    /// working directory is used if present, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> HarnessResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(HarnessConfig::default())
                }
            }
        }
    }

    /// Pick the engine profile for a run. An explicit command wins, then
    /// a named profile, then `default_engine`, then a sole configured
    /// profile.
    pub fn resolve_engine(
        &self,
        name: Option<&str>,
        command: Option<&Path>,
    ) -> HarnessResult<EngineProfile> {
        if let Some(command) = command {
            let profile = EngineProfile::from_command(command);
            profile.validate()?;
            return Ok(profile);
        }
        let selected = name.or(self.default_engine.as_deref());
        let profile = match selected {
            Some(name) => {
                let mut profile = self
                    .engines
                    .get(name)
                    .cloned()
                    .ok_or_else(|| HarnessError::UnknownEngine(name.to_string()))?;
                if profile.name.is_empty() {
                    profile.name = name.to_string();
                }
                profile
            }
            None => {
                let mut profiles = self.engines.values();
                match (profiles.next(), profiles.next()) {
                    (Some(only), None) => only.clone(),
                    _ => {
                        return Err(HarnessError::Config(
                            "no engine selected; pass --engine or --engine-cmd, or set \
                             default_engine in the config"
                                .to_string(),
                        ));
                    }
                }
            }
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored_tests.iter().any(|p| path.contains(p.as_str()))
    }

    pub fn is_known_crash(&self, path: &str) -> bool {
        self.known_crashes.iter().any(|p| path.contains(p.as_str()))
    }
}
