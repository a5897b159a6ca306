//! Resolution of harness support files (`assert.js`, `sta.js`, ...).
//!
//! The whole `harness/` directory is read once at startup and cached, so
//! per-test resolution is a map lookup and a missing include is detected
//! deterministically no matter which worker hits it first.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{HarnessError, HarnessResult};
use crate::metadata::TestMetadata;

/// Includes injected into every non-raw test, in this order, before any
/// explicitly requested ones.
pub const DEFAULT_INCLUDES: [&str; 2] = ["assert.js", "sta.js"];

/// Additional include injected for `async` tests; defines `$DONE` and the
/// completion protocol printed on stdout.
pub const ASYNC_INCLUDE: &str = "doneprintHandle.js";

/// One resolved harness file, by name, with its on-disk path (for engines
/// invoked with separate file arguments) and cached contents (for
/// concatenated invocation).
#[derive(Debug, Clone)]
pub struct PrologueUnit {
    pub name: String,
    pub path: PathBuf,
    pub source: Arc<str>,
}

/// Cache of every file in the suite's `harness/` directory.
#[derive(Debug)]
pub struct HarnessKit {
    dir: PathBuf,
    files: HashMap<String, PrologueUnit>,
}

impl HarnessKit {
    /// Load all `.js` files under `<suite_root>/harness`.
    pub fn load(suite_root: &Path) -> HarnessResult<Self> {
        let dir = suite_root.join("harness");
        if !dir.is_dir() {
            return Err(HarnessError::HarnessDirMissing(dir));
        }
        let mut files = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "js") {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let source = fs::read_to_string(&path)?;
            files.insert(name.to_string(), PrologueUnit {
                name: name.to_string(),
                path: path.clone(),
                source: Arc::from(source.as_str()),
            });
        }
        Ok(HarnessKit { dir, files })
    }

    /// Empty kit for corpora that carry no harness directory. Tests that
    /// request includes will then fail resolution, which is the point.
    pub fn empty(dir: PathBuf) -> Self {
        HarnessKit {
            dir,
            files: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, name: &str) -> HarnessResult<&PrologueUnit> {
        self.files.get(name).ok_or_else(|| HarnessError::UnresolvedInclude {
            name: name.to_string(),
            dir: self.dir.clone(),
        })
    }

    /// Full prologue for a test: defaults, the async handle when flagged,
    /// then explicit includes in declared order, each file at most once.
    /// Raw tests get no prologue at all.
    pub fn prologue(&self, meta: &TestMetadata) -> HarnessResult<Vec<PrologueUnit>> {
        if meta.flags.raw {
            return Ok(Vec::new());
        }
        let mut seen = Vec::new();
        let mut units = Vec::new();
        let mut push = |name: &str, units: &mut Vec<PrologueUnit>| -> HarnessResult<()> {
            if seen.iter().any(|s: &String| s == name) {
                return Ok(());
            }
            seen.push(name.to_string());
            units.push(self.get(name)?.clone());
            Ok(())
        };
        for name in DEFAULT_INCLUDES {
            push(name, &mut units)?;
        }
        if meta.flags.is_async {
            push(ASYNC_INCLUDE, &mut units)?;
        }
        for name in &meta.includes {
            push(name, &mut units)?;
        }
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::TestMetadata;

    fn kit_with(files: &[(&str, &str)]) -> (tempfile::TempDir, HarnessKit) {
        let dir = tempfile::tempdir().unwrap();
        let harness = dir.path().join("harness");
        std::fs::create_dir(&harness).unwrap();
        for (name, content) in files {
            std::fs::write(harness.join(name), content).unwrap();
        }
        let kit = HarnessKit::load(dir.path()).unwrap();
        (dir, kit)
    }

    #[test]
    fn defaults_come_first_in_order() {
        let (_dir, kit) = kit_with(&[
            ("assert.js", "// assert"),
            ("sta.js", "// sta"),
            ("compareArray.js", "// cmp"),
        ]);
        let meta = TestMetadata::parse("/*---\nincludes: [compareArray.js]\n---*/").unwrap();
        let units = kit.prologue(&meta).unwrap();
        let names: Vec<&str> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["assert.js", "sta.js", "compareArray.js"]);
    }

    #[test]
    fn async_tests_pull_the_done_handle() {
        let (_dir, kit) = kit_with(&[
            ("assert.js", ""),
            ("sta.js", ""),
            ("doneprintHandle.js", "// $DONE"),
        ]);
        let meta = TestMetadata::parse("/*---\nflags: [async]\n---*/").unwrap();
        let units = kit.prologue(&meta).unwrap();
        assert_eq!(units[2].name, ASYNC_INCLUDE);
    }

    #[test]
    fn raw_tests_get_no_prologue() {
        let (_dir, kit) = kit_with(&[("assert.js", ""), ("sta.js", "")]);
        let meta = TestMetadata::parse("/*---\nflags: [raw]\n---*/").unwrap();
        assert!(kit.prologue(&meta).unwrap().is_empty());
    }

    #[test]
    fn duplicate_includes_are_injected_once() {
        let (_dir, kit) = kit_with(&[("assert.js", ""), ("sta.js", "")]);
        let meta = TestMetadata::parse("/*---\nincludes: [sta.js, assert.js]\n---*/").unwrap();
        let units = kit.prologue(&meta).unwrap();
        assert_eq!(units.len(), 2);
    }

    #[test]
    fn missing_include_is_a_resolution_error() {
        let (_dir, kit) = kit_with(&[("assert.js", ""), ("sta.js", "")]);
        let meta = TestMetadata::parse("/*---\nincludes: [nonexistent.js]\n---*/").unwrap();
        let err = kit.prologue(&meta).unwrap_err();
        assert!(matches!(err, HarnessError::UnresolvedInclude { .. }));
    }

    #[test]
    fn missing_harness_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            HarnessKit::load(dir.path()),
            Err(HarnessError::HarnessDirMissing(_))
        ));
    }
}
