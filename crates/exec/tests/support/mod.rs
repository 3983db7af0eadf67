#![cfg(unix)]
#![allow(dead_code)]

use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Supervisor binary built alongside these tests.
pub const SUPERVISOR: &str = env!("CARGO_BIN_EXE_substrate-exec-supervisor");

/// True while `pid` exists and is not a zombie awaiting its parent.
pub fn is_running(pid: u32) -> bool {
    if kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // State is the first field after the parenthesised command name.
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z"),
        Err(_) => true,
    }
}

pub fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_running(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    !is_running(pid)
}

/// Poll until `path` has content or `timeout` elapses.
pub fn wait_for_file(path: &Path, timeout: Duration) -> String {
    wait_for_contents(path, timeout, |contents| !contents.is_empty())
}

pub fn wait_for_contents(path: &Path, timeout: Duration, ready: impl Fn(&str) -> bool) -> String {
    let deadline = Instant::now() + timeout;
    loop {
        let contents = std::fs::read_to_string(path).unwrap_or_default();
        if ready(&contents) || Instant::now() >= deadline {
            return contents;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Pids written one per line by a test command.
pub fn read_pids(path: &Path) -> Vec<u32> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

pub fn pid_file(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("pids")
}
