//! End-to-end pipeline tests over a synthetic corpus, with /bin/sh
//! playing the engine. Test bodies are shell scripts that reproduce the
//! exit-status and stream conventions a real engine shell would show.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stoat_harness::baseline::Baseline;
use stoat_harness::engine::EngineProfile;
use stoat_harness::error::HarnessError;
use stoat_harness::pool::{PoolConfig, run_pool};
use stoat_harness::results::{TestRecord, Verdict};
use stoat_harness::runner::{PipelineConfig, TestPipeline};

fn sh_profile() -> EngineProfile {
    let mut profile = EngineProfile::from_command(Path::new("/bin/sh"));
    profile.sentinel_template = "echo '{}'".to_string();
    profile
}

fn write_test(suite: &Path, rel: &str, content: &str) {
    let path = suite.join("test").join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn build_suite() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let harness = dir.path().join("harness");
    fs::create_dir_all(&harness).unwrap();
    for name in ["assert.js", "sta.js", "doneprintHandle.js"] {
        fs::write(harness.join(name), "true\n").unwrap();
    }
    let suite = dir.path();

    write_test(
        suite,
        "language/pass.js",
        "/*---\ndescription: completes cleanly\nflags: [noStrict]\n---*/\nexit 0\n",
    );
    write_test(
        suite,
        "language/fail.js",
        "/*---\ndescription: assertion failure\nflags: [noStrict]\n---*/\n\
         echo 'Test262Error: boom' >&2\nexit 1\n",
    );
    write_test(
        suite,
        "language/neg-runtime.js",
        "/*---\ndescription: expects a runtime TypeError\nflags: [noStrict]\n\
         negative:\n  phase: runtime\n  type: TypeError\n---*/\n\
         echo 'TypeError: nope' >&2\nexit 1\n",
    );
    write_test(
        suite,
        "language/neg-phase.js",
        "/*---\ndescription: declared parse, fails at runtime\nflags: [noStrict]\n\
         negative:\n  phase: parse\n  type: SyntaxError\n---*/\n\
         echo 'SyntaxError: late' >&2\nexit 1\n",
    );
    write_test(
        suite,
        "language/strict-only.js",
        "/*---\ndescription: needs the strict directive\nflags: [onlyStrict]\n---*/\n\
         grep -q '^\"use strict\"' \"$0\" && exit 0 || exit 1\n",
    );
    write_test(
        suite,
        "language/both-modes.js",
        "/*---\ndescription: passes sloppy, breaks strict\n---*/\n\
         grep -q '^\"use strict\"' \"$0\" && { echo 'Test262Error: strict broke' >&2; exit 1; } || exit 0\n",
    );
    write_test(
        suite,
        "built-ins/slow.js",
        "/*---\ndescription: hangs\nflags: [noStrict]\n---*/\nsleep 5\n",
    );
    write_test(
        suite,
        "built-ins/crash.js",
        "/*---\ndescription: dies on a signal\nflags: [noStrict]\n---*/\nkill -11 $$\n",
    );
    write_test(
        suite,
        "built-ins/async-ok.js",
        "/*---\ndescription: signals completion\nflags: [async, noStrict]\n---*/\n\
         echo 'Test262:AsyncTestComplete'\n",
    );
    write_test(
        suite,
        "built-ins/async-fail.js",
        "/*---\ndescription: signals failure\nflags: [async, noStrict]\n---*/\n\
         echo 'Test262:AsyncTestFailure: Test262Error: denied'\n",
    );
    write_test(
        suite,
        "built-ins/async-missing.js",
        "/*---\ndescription: never calls $DONE\nflags: [async, noStrict]\n---*/\ntrue\n",
    );
    write_test(
        suite,
        "intl402/skip-feature.js",
        "/*---\ndescription: needs an unsupported feature\nfeatures: [Temporal]\n\
         flags: [noStrict]\n---*/\nexit 0\n",
    );
    write_test(
        suite,
        "language/bad-meta.js",
        "/*---\nnegative:\n  phase: parse\n---*/\ntrue\n",
    );
    write_test(suite, "language/import_FIXTURE.js", "true\n");
    dir
}

fn build_pipeline(suite: &Path) -> Arc<TestPipeline> {
    Arc::new(
        TestPipeline::new(PipelineConfig {
            suite_root: suite.to_path_buf(),
            profile: sh_profile(),
            timeout: Duration::from_secs(1),
            skip_features: vec!["Temporal".to_string()],
            only_features: Vec::new(),
            ignored_tests: Vec::new(),
            known_crashes: Vec::new(),
            strictness: None,
        })
        .unwrap(),
    )
}

#[test]
fn full_run_produces_expected_verdicts() {
    let suite = build_suite();
    let pipeline = build_pipeline(suite.path());
    let tests = pipeline.discover(&[], None, None).unwrap();
    assert_eq!(tests.len(), 13, "fixture must not be discovered");

    let log_path = suite.path().join("run.jsonl");
    let config = PoolConfig {
        jobs: 2,
        verbose: 0,
        json_mode: true,
        log_path: Some(log_path.clone()),
        log_append: false,
        max_failures: 20,
    };
    let (summary, results) = run_pool(pipeline, tests, &config, None).unwrap();

    let by_path: HashMap<&str, &TestRecord> = results
        .records()
        .iter()
        .map(|r| (r.path.as_str(), r))
        .collect();
    let verdict = |path: &str| by_path[path].verdict;

    assert_eq!(verdict("language/pass.js"), Verdict::Pass);
    assert_eq!(verdict("language/neg-runtime.js"), Verdict::Pass);
    assert_eq!(verdict("language/strict-only.js"), Verdict::Pass);
    assert_eq!(verdict("built-ins/async-ok.js"), Verdict::Pass);

    assert_eq!(verdict("language/fail.js"), Verdict::Fail);
    assert!(
        by_path["language/fail.js"]
            .error
            .as_deref()
            .unwrap()
            .contains("boom")
    );
    assert_eq!(
        by_path["language/fail.js"].error_name.as_deref(),
        Some("Test262Error")
    );

    assert_eq!(verdict("language/neg-phase.js"), Verdict::Fail);
    assert!(
        by_path["language/neg-phase.js"]
            .error
            .as_deref()
            .unwrap()
            .contains("at runtime")
    );

    assert_eq!(verdict("language/both-modes.js"), Verdict::Fail);
    assert_eq!(
        by_path["language/both-modes.js"].mode.as_deref(),
        Some("strict")
    );

    assert_eq!(verdict("built-ins/async-fail.js"), Verdict::Fail);
    assert!(
        by_path["built-ins/async-fail.js"]
            .error
            .as_deref()
            .unwrap()
            .contains("denied")
    );
    assert_eq!(verdict("built-ins/async-missing.js"), Verdict::Fail);
    assert!(
        by_path["built-ins/async-missing.js"]
            .error
            .as_deref()
            .unwrap()
            .contains("$DONE")
    );

    assert_eq!(verdict("built-ins/slow.js"), Verdict::Timeout);
    assert_eq!(verdict("built-ins/crash.js"), Verdict::Crash);

    assert_eq!(verdict("intl402/skip-feature.js"), Verdict::Skip);
    assert!(
        by_path["intl402/skip-feature.js"]
            .error
            .as_deref()
            .unwrap()
            .contains("Temporal")
    );
    assert_eq!(verdict("language/bad-meta.js"), Verdict::Skip);
    assert!(
        by_path["language/bad-meta.js"]
            .error
            .as_deref()
            .unwrap()
            .contains("metadata error")
    );

    assert_eq!(summary.total, 13);
    assert_eq!(summary.passed, 4);
    assert_eq!(summary.failed, 5);
    assert_eq!(summary.timeout, 1);
    assert_eq!(summary.crashed, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.executed(), 11);
    assert!((summary.pass_rate() - 4.0 / 11.0 * 100.0).abs() < 0.01);

    let log = fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 13);
    for line in lines {
        let parsed: TestRecord = serde_json::from_str(line).unwrap();
        assert!(!parsed.path.is_empty());
    }
}

#[test]
fn baseline_classification_over_a_run() {
    let suite = build_suite();
    let pipeline = build_pipeline(suite.path());
    let tests = pipeline.discover(&[], None, None).unwrap();
    let config = PoolConfig {
        jobs: 2,
        verbose: 0,
        json_mode: true,
        log_path: None,
        log_append: false,
        max_failures: 20,
    };
    let (_, results) = run_pool(pipeline, tests, &config, None).unwrap();

    let baseline_path = suite.path().join("baseline.json");
    fs::write(
        &baseline_path,
        r#"{
            "language/fail.js": "FAIL",
            "language/pass.js": "FAIL",
            "built-ins/slow.js": "CRASH"
        }"#,
    )
    .unwrap();
    let baseline = Baseline::load(&baseline_path).unwrap();
    let delta = baseline.classify(results.records());

    let fixed: Vec<&str> = delta.fixed.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(fixed, vec!["language/pass.js"]);

    let shifted: Vec<&str> = delta.shifted.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(shifted, vec!["built-ins/slow.js"]);
    assert_eq!(delta.shifted[0].actual, Verdict::Timeout);

    let mut regressions: Vec<&str> = delta.regressions.iter().map(|e| e.path.as_str()).collect();
    regressions.sort();
    assert_eq!(regressions, vec![
        "built-ins/async-fail.js",
        "built-ins/async-missing.js",
        "built-ins/crash.js",
        "language/both-modes.js",
        "language/neg-phase.js",
    ]);
    assert_eq!(delta.unchanged_failures, 1);
}

#[test]
fn unresolved_include_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let harness = dir.path().join("harness");
    fs::create_dir_all(&harness).unwrap();
    fs::write(harness.join("assert.js"), "true\n").unwrap();
    fs::write(harness.join("sta.js"), "true\n").unwrap();
    write_test(
        dir.path(),
        "language/needs-helper.js",
        "/*---\ndescription: depends on a missing include\nflags: [noStrict]\n\
         includes: [definitelyMissing.js]\n---*/\nexit 0\n",
    );

    let pipeline = Arc::new(
        TestPipeline::new(PipelineConfig {
            suite_root: dir.path().to_path_buf(),
            profile: sh_profile(),
            timeout: Duration::from_secs(1),
            skip_features: Vec::new(),
            only_features: Vec::new(),
            ignored_tests: Vec::new(),
            known_crashes: Vec::new(),
            strictness: None,
        })
        .unwrap(),
    );
    let tests = pipeline.discover(&[], None, None).unwrap();
    let config = PoolConfig {
        jobs: 1,
        verbose: 0,
        json_mode: true,
        log_path: None,
        log_append: false,
        max_failures: 5,
    };
    match run_pool(pipeline, tests, &config, None) {
        Err(HarnessError::UnresolvedInclude { name, .. }) => {
            assert_eq!(name, "definitelyMissing.js");
        }
        other => panic!("expected an unresolved include abort, got {other:?}"),
    }
}
