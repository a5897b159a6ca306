//! Engine profiles: how to invoke the JavaScript engine under test.
//!
//! The harness never links an engine. It spawns one external process per
//! test invocation and reads exit status, stdout, and stderr. A profile
//! describes the engine binary and the conventions it follows.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::metadata::{ExecMode, TestMetadata};

/// Marker printed by the injected prologue the moment harness setup has
/// finished and the test body is about to execute. A reported failure
/// without this marker on stdout happened before execution (parse or
/// resolution); with it, at runtime.
pub const EXEC_STARTED_MARKER: &str = "__exec_started__";

/// How test sources reach the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStyle {
    /// Harness files, marker, and body concatenated into one scratch file.
    #[default]
    Concat,
    /// Harness files and the test passed as separate arguments; the
    /// engine evaluates them in order in one realm.
    Files,
}

/// Invocation profile for one engine, usually loaded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineProfile {
    /// Profile name, filled from the config table key.
    #[serde(skip)]
    pub name: String,

    /// Engine binary. Bare names are resolved through PATH.
    pub binary: PathBuf,

    /// Arguments always passed before anything else.
    pub args: Vec<String>,

    pub invocation: InvocationStyle,

    /// Exit code the engine uses to report an uncaught error or parse
    /// failure. Any other non-zero exit (or signal death) is a crash.
    pub failure_exit_code: i32,

    /// Statement template printing its `{}` placeholder to stdout with a
    /// trailing newline, in the engine's input language.
    pub sentinel_template: String,

    /// Flag selecting module evaluation for the file that follows.
    pub module_flag: Option<String>,

    /// Flags selecting strict/sloppy evaluation, honored only by the
    /// `files` style; `concat` prepends a directive instead.
    pub strict_flag: Option<String>,
    pub sloppy_flag: Option<String>,

    /// Flag telling the engine its agent cannot block the main thread.
    pub can_block_flag: Option<String>,

    /// Extra source injected before the harness prologue, for host
    /// bootstrap such as a `$262` shim.
    pub bootstrap: Option<String>,

    /// Features this engine is declared to support. Empty means no
    /// feature-based skipping on the profile's account.
    pub features: Vec<String>,

    /// Prefix on the first stderr line that identifies a pre-execution
    /// parse error. Only consulted for the `files` style, which carries
    /// no marker.
    pub parse_error_prefix: Option<String>,

    /// Same, for module resolution failures.
    pub resolution_error_prefix: Option<String>,
}

impl Default for EngineProfile {
    fn default() -> Self {
        EngineProfile {
            name: String::new(),
            binary: PathBuf::new(),
            args: Vec::new(),
            invocation: InvocationStyle::Concat,
            failure_exit_code: 1,
            sentinel_template: "print('{}');".to_string(),
            module_flag: None,
            strict_flag: None,
            sloppy_flag: None,
            can_block_flag: None,
            bootstrap: None,
            features: Vec::new(),
            parse_error_prefix: None,
            resolution_error_prefix: None,
        }
    }
}

impl EngineProfile {
    /// Ad-hoc profile around a bare binary, used by `--engine-cmd`.
    pub fn from_command(binary: &Path) -> Self {
        let name = binary
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("engine")
            .to_string();
        EngineProfile {
            name,
            binary: binary.to_path_buf(),
            ..EngineProfile::default()
        }
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.binary.as_os_str().is_empty() {
            return Err(HarnessError::Config(format!(
                "engine profile '{}' has no binary",
                self.name
            )));
        }
        if !self.sentinel_template.contains("{}") {
            return Err(HarnessError::Config(format!(
                "engine profile '{}': sentinel_template has no '{{}}' placeholder",
                self.name
            )));
        }
        Ok(())
    }

    /// Statement that prints the execution-started marker.
    pub fn sentinel_statement(&self) -> String {
        self.sentinel_template.replace("{}", EXEC_STARTED_MARKER)
    }

    /// Whether a run of `mode` can tell pre-execution failures from
    /// runtime ones. Concatenated runs carry the stdout marker; `files`
    /// runs need a configured stderr prefix; raw sources get nothing
    /// injected and so give no signal.
    pub fn has_phase_oracle(&self, mode: ExecMode) -> bool {
        match self.invocation {
            InvocationStyle::Concat => mode != ExecMode::Raw,
            InvocationStyle::Files => {
                self.parse_error_prefix.is_some() || self.resolution_error_prefix.is_some()
            }
        }
    }

    /// Capability the profile lacks for this test, if any. Such tests are
    /// skipped with a diagnostic rather than run to a meaningless verdict.
    pub fn missing_capability(&self, meta: &TestMetadata) -> Option<String> {
        if meta.flags.module && self.module_flag.is_none() {
            return Some("module evaluation (no module_flag configured)".to_string());
        }
        if meta.flags.can_block == Some(false)
            && self.can_block_flag.is_none()
            && !self.features.iter().any(|f| f == "CanBlockIsFalse")
        {
            return Some("non-blocking agent (no can_block_flag configured)".to_string());
        }
        if self.invocation == InvocationStyle::Files {
            let modes = meta.execution_modes();
            if modes.contains(&ExecMode::Strict) && self.strict_flag.is_none() {
                return Some("strict evaluation (no strict_flag configured)".to_string());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_statement_substitutes_marker() {
        let profile = EngineProfile::default();
        assert_eq!(
            profile.sentinel_statement(),
            format!("print('{EXEC_STARTED_MARKER}');")
        );
    }

    #[test]
    fn default_profile_fails_validation_without_binary() {
        assert!(EngineProfile::default().validate().is_err());
        assert!(EngineProfile::from_command(Path::new("/bin/sh")).validate().is_ok());
    }

    #[test]
    fn module_tests_need_a_module_flag() {
        let profile = EngineProfile::from_command(Path::new("/bin/sh"));
        let meta = TestMetadata::parse("/*---\nflags: [module]\n---*/").unwrap();
        assert!(profile.missing_capability(&meta).is_some());

        let mut with_flag = profile.clone();
        with_flag.module_flag = Some("--module".to_string());
        assert!(with_flag.missing_capability(&meta).is_none());
    }

    #[test]
    fn concat_has_an_oracle_except_for_raw() {
        let profile = EngineProfile::default();
        assert!(profile.has_phase_oracle(ExecMode::Strict));
        assert!(!profile.has_phase_oracle(ExecMode::Raw));

        let mut files = EngineProfile::default();
        files.invocation = InvocationStyle::Files;
        assert!(!files.has_phase_oracle(ExecMode::Strict));
        files.parse_error_prefix = Some("Parse errors:".to_string());
        assert!(files.has_phase_oracle(ExecMode::Strict));
    }
}
