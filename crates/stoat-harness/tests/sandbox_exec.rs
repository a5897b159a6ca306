//! Subprocess containment tests using /bin/sh as a stand-in engine.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use stoat_harness::engine::{EXEC_STARTED_MARKER, EngineProfile};
use stoat_harness::metadata::ExecMode;
use stoat_harness::sandbox::{ExecOutcome, ExecRequest, Sandbox};

static WORKER_IDS: AtomicUsize = AtomicUsize::new(100);

fn sh_profile() -> EngineProfile {
    let mut profile = EngineProfile::from_command(Path::new("/bin/sh"));
    profile.sentinel_template = "echo '{}'".to_string();
    profile
}

fn sandbox(profile: EngineProfile) -> Sandbox {
    let worker = WORKER_IDS.fetch_add(1, Ordering::SeqCst);
    Sandbox::new(Arc::new(profile), worker).unwrap()
}

fn request<'a>(test_path: &'a Path, body: &'a str, mode: ExecMode) -> ExecRequest<'a> {
    ExecRequest {
        test_path,
        body,
        prologue: &[],
        mode,
        can_block: None,
        deadline: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn clean_exit_is_captured() {
    let sandbox = sandbox(sh_profile());
    let outcome = sandbox
        .execute(&request(Path::new("/tmp/t.js"), "exit 0", ExecMode::Sloppy))
        .await;
    match outcome {
        ExecOutcome::Completed(out) => {
            assert_eq!(out.code, Some(0));
            assert_eq!(out.signal, None);
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn failure_exit_and_stderr_are_captured() {
    let sandbox = sandbox(sh_profile());
    let body = "echo 'TypeError: nope' >&2\nexit 1";
    let outcome = sandbox
        .execute(&request(Path::new("/tmp/t.js"), body, ExecMode::Sloppy))
        .await;
    match outcome {
        ExecOutcome::Completed(out) => {
            assert_eq!(out.code, Some(1));
            assert!(out.stderr.contains("TypeError: nope"));
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn sentinel_marker_reaches_stdout() {
    let sandbox = sandbox(sh_profile());
    let outcome = sandbox
        .execute(&request(Path::new("/tmp/t.js"), "exit 0", ExecMode::Sloppy))
        .await;
    match outcome {
        ExecOutcome::Completed(out) => {
            assert!(
                out.stdout.lines().any(|l| l.trim() == EXEC_STARTED_MARKER),
                "marker missing from stdout: {:?}",
                out.stdout
            );
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn strict_mode_prepends_the_directive() {
    let sandbox = sandbox(sh_profile());
    let body = r#"grep -q '^"use strict"' "$0" && exit 0 || exit 1"#;
    let outcome = sandbox
        .execute(&request(Path::new("/tmp/t.js"), body, ExecMode::Strict))
        .await;
    match outcome {
        ExecOutcome::Completed(out) => assert_eq!(out.code, Some(0)),
        other => panic!("expected completion, got {other:?}"),
    }

    let sloppy = sandbox
        .execute(&request(Path::new("/tmp/t.js"), body, ExecMode::Sloppy))
        .await;
    match sloppy {
        ExecOutcome::Completed(out) => assert_eq!(out.code, Some(1)),
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn signal_death_is_visible() {
    let sandbox = sandbox(sh_profile());
    let outcome = sandbox
        .execute(&request(Path::new("/tmp/t.js"), "kill -11 $$", ExecMode::Sloppy))
        .await;
    match outcome {
        ExecOutcome::Completed(out) => {
            assert_eq!(out.code, None);
            assert_eq!(out.signal, Some(11));
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn deadline_kills_a_hung_engine() {
    let sandbox = sandbox(sh_profile());
    let started = Instant::now();
    let mut req = request(Path::new("/tmp/t.js"), "sleep 30", ExecMode::Sloppy);
    req.deadline = Duration::from_millis(300);
    let outcome = sandbox.execute(&req).await;
    assert!(matches!(outcome, ExecOutcome::TimedOut { .. }));
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "timeout did not fire promptly"
    );
}

#[tokio::test]
async fn missing_binary_is_a_spawn_failure() {
    let mut profile = sh_profile();
    profile.binary = Path::new("/no/such/engine-binary").to_path_buf();
    let sandbox = sandbox(profile);
    let outcome = sandbox
        .execute(&request(Path::new("/tmp/t.js"), "exit 0", ExecMode::Sloppy))
        .await;
    match outcome {
        ExecOutcome::SpawnFailed(message) => {
            assert!(message.contains("engine-binary"), "message: {message}");
        }
        other => panic!("expected spawn failure, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_workers_stage_module_scratch_to_distinct_files() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("x.js");
    let second = dir.path().join("y.js");
    std::fs::write(&first, "// module test").unwrap();
    std::fs::write(&second, "// module test").unwrap();

    let a = sandbox(sh_profile());
    let b = sandbox(sh_profile());
    let body = r#"echo "$0""#;
    let req_a = request(&first, body, ExecMode::Module);
    let req_b = request(&second, body, ExecMode::Module);
    let (out_a, out_b) = tokio::join!(a.execute(&req_a), b.execute(&req_b));

    let executed = |outcome: &ExecOutcome| -> String {
        match outcome {
            ExecOutcome::Completed(out) => {
                assert_eq!(out.code, Some(0));
                out.stdout
                    .lines()
                    .rev()
                    .find(|l| !l.trim().is_empty())
                    .map(|l| l.trim().to_string())
                    .unwrap()
            }
            other => panic!("expected completion, got {other:?}"),
        }
    };
    let path_a = executed(&out_a);
    let path_b = executed(&out_b);
    assert!(path_a.contains(".stoat-scratch"), "ran {path_a}");
    assert_ne!(path_a, path_b, "both workers staged to the same file");
}

#[tokio::test]
async fn module_scratch_is_staged_beside_the_test_and_removed() {
    let dir = tempfile::tempdir().unwrap();
    let test_path = dir.path().join("mod.js");
    std::fs::write(&test_path, "// module test").unwrap();

    let sandbox = sandbox(sh_profile());
    let body = r#"ls -a "$(dirname "$0")" >&2; exit 0"#;
    let outcome = sandbox
        .execute(&request(&test_path, body, ExecMode::Module))
        .await;
    match outcome {
        ExecOutcome::Completed(out) => {
            assert_eq!(out.code, Some(0));
            assert!(
                out.stderr.contains(".stoat-scratch"),
                "scratch file not beside test: {:?}",
                out.stderr
            );
        }
        other => panic!("expected completion, got {other:?}"),
    }

    let leftovers: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".stoat-scratch"))
        .collect();
    assert!(leftovers.is_empty(), "scratch not cleaned up: {leftovers:?}");
}
