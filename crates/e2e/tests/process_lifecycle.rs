//! Graceful and forced shutdown of real child processes.

#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use common::pid_alive;
use webapp_e2e::{LaunchSpec, ProcessLauncher};

#[tokio::test]
async fn cooperative_process_stops_on_close_request() {
    let launcher = ProcessLauncher::new(Duration::from_secs(5));
    let process = launcher.start(&LaunchSpec::new("sleep").arg("30")).unwrap();
    let pid = process.id().unwrap();
    assert!(pid_alive(pid));

    let start = Instant::now();
    launcher.stop(Some(process)).await;

    assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
    assert!(!pid_alive(pid));
}

#[tokio::test]
async fn stubborn_process_is_killed_after_grace() {
    let grace = Duration::from_millis(300);
    let launcher = ProcessLauncher::new(grace);
    let spec = LaunchSpec::new("sh").args(["-c", "trap '' TERM; exec sleep 10"]);
    let process = launcher.start(&spec).unwrap();
    let pid = process.id().unwrap();

    // Let the shell install its trap before asking it to stop
    tokio::time::sleep(Duration::from_millis(200)).await;

    let start = Instant::now();
    launcher.stop(Some(process)).await;
    let elapsed = start.elapsed();

    assert!(elapsed >= grace, "stopped before the grace period: {:?}", elapsed);
    assert!(elapsed < grace + Duration::from_secs(2), "took {:?}", elapsed);
    assert!(!pid_alive(pid));
}

#[tokio::test]
async fn stopping_exited_process_is_noop() {
    let launcher = ProcessLauncher::new(Duration::from_secs(5));
    let mut process = launcher.start(&LaunchSpec::new("true")).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !process.has_exited() {
        assert!(Instant::now() < deadline, "`true` never exited");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let start = Instant::now();
    launcher.stop(Some(process)).await;
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn working_dir_and_env_reach_the_child() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = ProcessLauncher::default();
    let spec = LaunchSpec::new("sh")
        .args(["-c", "printf '%s' \"$GREETING\" > out.txt"])
        .current_dir(dir.path())
        .env("GREETING", "hello");
    let mut process = launcher.start(&spec).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !process.has_exited() {
        assert!(Instant::now() < deadline, "child never exited");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    launcher.stop(Some(process)).await;

    let written = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
    assert_eq!(written, "hello");
}
