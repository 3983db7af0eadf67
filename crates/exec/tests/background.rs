#![cfg(unix)]

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};
use substrate_exec_core::{
    BackgroundHandle, BackgroundLauncher, ExecConfig, ExecOutcome, ExecutionRequest, Executor,
    NativePty, PtyBackend, TimeoutPolicy,
};
use support::{is_running, wait_for_exit, wait_for_file, SUPERVISOR};
use tokio_util::sync::CancellationToken;

fn launcher() -> BackgroundLauncher {
    BackgroundLauncher::new("sh", Arc::new(NativePty)).with_supervisor(SUPERVISOR)
}

fn short_tier(ms: u64) -> TimeoutPolicy {
    TimeoutPolicy {
        background: Some(Duration::from_millis(ms)),
        ..TimeoutPolicy::default()
    }
}

fn cleanup(handle: &BackgroundHandle) {
    let _ = substrate_exec_core::process::kill_process_group(handle.pid);
    if let Some(dir) = handle.output_dir() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[test]
fn test_launch_returns_before_command_finishes() {
    let start = Instant::now();
    let handle = launcher()
        .launch("sleep 1 && echo x", false, &TimeoutPolicy::default())
        .unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));

    assert!(handle.pid > 0);
    assert!(handle.stdout_file.exists());
    assert!(handle.stderr_file.exists());
    let dir_name = handle
        .output_dir()
        .and_then(|dir| dir.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap();
    assert!(dir_name.starts_with("substrate-bg-"));

    let out = wait_for_file(&handle.stdout_file, Duration::from_secs(5));
    assert_eq!(out, "x\n");
    cleanup(&handle);
}

#[test]
fn test_streams_go_to_separate_files() {
    let handle = launcher()
        .launch(
            "echo 'to stdout'; echo 'to stderr' >&2",
            false,
            &TimeoutPolicy::default(),
        )
        .unwrap();

    let err = wait_for_file(&handle.stderr_file, Duration::from_secs(5));
    let out = wait_for_file(&handle.stdout_file, Duration::from_secs(5));
    assert_eq!(out, "to stdout\n");
    assert_eq!(err, "to stderr\n");
    cleanup(&handle);
}

#[test]
fn test_reported_pid_is_the_running_command() {
    let handle = launcher()
        .launch("sleep 5", false, &TimeoutPolicy::default())
        .unwrap();
    assert!(is_running(handle.pid));
    cleanup(&handle);
    assert!(wait_for_exit(handle.pid, Duration::from_secs(3)));
}

#[test]
fn test_spawn_failure_is_reported_synchronously() {
    let err = BackgroundLauncher::new("/nonexistent/substrate-shell", Arc::new(NativePty))
        .with_supervisor(SUPERVISOR)
        .launch("true", false, &TimeoutPolicy::default())
        .unwrap_err();
    assert_eq!(err.kind(), "launch");
    assert!(err.to_string().contains("/nonexistent/substrate-shell"));
}

#[test]
fn test_background_tier_kills_overrunning_process() {
    let handle = launcher()
        .launch("sleep 10; echo finished", false, &short_tier(200))
        .unwrap();
    assert!(is_running(handle.pid));

    assert!(wait_for_exit(handle.pid, Duration::from_secs(3)));
    let out = std::fs::read_to_string(&handle.stdout_file).unwrap();
    assert!(out.is_empty());
    cleanup(&handle);
}

#[test]
fn test_background_tier_kills_overrunning_pty_process() {
    if !NativePty.is_supported() {
        return;
    }
    let handle = launcher()
        .launch("echo started; sleep 10; echo finished", true, &short_tier(300))
        .unwrap();

    assert!(wait_for_exit(handle.pid, Duration::from_secs(3)));
    let out = std::fs::read_to_string(&handle.stdout_file).unwrap();
    assert!(out.contains("started"));
    assert!(!out.contains("finished"));
    cleanup(&handle);
}

#[test]
fn test_pty_background_writes_to_stdout_file() {
    if !NativePty.is_supported() {
        return;
    }
    let handle = launcher()
        .launch("sleep 0.5; echo 'Hello from PTY background'", true, &TimeoutPolicy::default())
        .unwrap();
    assert!(handle.stderr_file.exists());

    let out = wait_for_file(&handle.stdout_file, Duration::from_secs(5));
    assert_eq!(out, "Hello from PTY background\r\n");
    cleanup(&handle);
}

#[test]
fn test_concurrent_launches_use_distinct_directories() {
    let a = launcher()
        .launch("echo a", false, &TimeoutPolicy::default())
        .unwrap();
    let b = launcher()
        .launch("echo b", false, &TimeoutPolicy::default())
        .unwrap();
    assert_ne!(a.output_dir(), b.output_dir());
    assert_ne!(a.stdout_file, b.stdout_file);
    cleanup(&a);
    cleanup(&b);
}

#[test]
fn test_command_outlives_the_launching_runtime() {
    let exec = Executor::new(ExecConfig::default().with_shell("sh")).with_supervisor(SUPERVISOR);
    let request = ExecutionRequest::new("sleep 0.5; echo survived").background(true);

    let handle = {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        match runtime.block_on(exec.execute(&request)).unwrap() {
            ExecOutcome::Background(handle) => handle,
            other => panic!("expected a background handle, got {other:?}"),
        }
    };

    let out = wait_for_file(&handle.stdout_file, Duration::from_secs(5));
    assert_eq!(out, "survived\n");
    cleanup(&handle);
}

#[tokio::test]
async fn test_dispatcher_cancellation_does_not_reach_background_process() {
    let exec = Executor::new(ExecConfig::default().with_shell("sh")).with_supervisor(SUPERVISOR);
    let cancel = CancellationToken::new();

    let outcome = exec
        .execute_with_cancel(&ExecutionRequest::new("sleep 5").background(true), &cancel)
        .await
        .unwrap();
    cancel.cancel();

    let ExecOutcome::Background(handle) = outcome else {
        panic!("expected a background handle");
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(is_running(handle.pid));
    cleanup(&handle);
}

#[tokio::test]
async fn test_background_ignores_slow_ok() {
    let exec = Executor::new(
        ExecConfig::default()
            .with_shell("sh")
            .with_timeouts(TimeoutPolicy {
                fast: Some(Duration::from_millis(50)),
                slow: Some(Duration::from_millis(50)),
                background: None,
            }),
    )
    .with_supervisor(SUPERVISOR);
    let outcome = exec
        .execute(
            &ExecutionRequest::new("sleep 0.3; echo survived")
                .background(true)
                .slow_ok(true),
        )
        .await
        .unwrap();
    let ExecOutcome::Background(handle) = outcome else {
        panic!("expected a background handle");
    };

    let out = wait_for_file(&handle.stdout_file, Duration::from_secs(5));
    assert_eq!(out, "survived\n");
    cleanup(&handle);
}
