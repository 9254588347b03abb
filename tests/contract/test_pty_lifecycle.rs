//! Contract Tests for PTY Process Lifecycle Management
//!
//! These tests define the expected behavior of PTY process creation,
//! deadline-bounded reads, interruption and termination using PtyProcess.

use persistent_shell::pty::{PtyProcess, ReadOutcome, SpawnConfig};
use persistent_shell::Error;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

fn sh_config() -> Option<SpawnConfig> {
    if !Path::new("/bin/sh").exists() {
        eprintln!("skipping: /bin/sh not available");
        return None;
    }
    let mut config = SpawnConfig::new("/bin/sh", std::env::temp_dir());
    config.env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
    config.env.insert("PS1".to_string(), String::new());
    Some(config)
}

/// Read until `needle` appears in the output
async fn read_for(process: &mut PtyProcess, needle: &str, within: Duration) -> (ReadOutcome, String) {
    let mut seen = Vec::new();
    let mut matcher = |chunk: &[u8]| {
        seen.extend_from_slice(chunk);
        String::from_utf8_lossy(&seen).contains(needle)
    };
    let outcome = process.read_until(&mut matcher, Instant::now() + within).await;
    (outcome, String::from_utf8_lossy(&seen).to_string())
}

#[tokio::test]
async fn test_spawn_write_read() {
    let Some(config) = sh_config() else {
        return;
    };

    // Arrange
    let mut process = PtyProcess::spawn(&config).expect("spawn /bin/sh");
    assert!(process.is_alive());
    assert!(process.pid().is_some());

    // Act
    process.write(b"echo pty-$((40 + 2))\n").unwrap();
    let (outcome, output) = read_for(&mut process, "pty-42", Duration::from_secs(5)).await;

    // Assert
    assert_eq!(outcome, ReadOutcome::Matched, "output was: {:?}", output);

    process.terminate(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn test_read_respects_deadline() {
    let Some(config) = sh_config() else {
        return;
    };
    let mut process = PtyProcess::spawn(&config).unwrap();
    process.write(b"sleep 5\n").unwrap();

    let started = std::time::Instant::now();
    let (outcome, _) = read_for(&mut process, "never-printed", Duration::from_millis(300)).await;

    assert_eq!(outcome, ReadOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(2));

    process.terminate(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn test_interrupt_stops_foreground_job() {
    let Some(config) = sh_config() else {
        return;
    };
    let mut process = PtyProcess::spawn(&config).unwrap();

    process.write(b"sleep 30\n").unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    process.interrupt().unwrap();
    process.write(b"echo after-$((1 + 1))\n").unwrap();

    let (outcome, output) = read_for(&mut process, "after-2", Duration::from_secs(5)).await;
    assert_eq!(outcome, ReadOutcome::Matched, "output was: {:?}", output);
    assert!(process.is_alive());

    process.terminate(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn test_exit_reports_closed() {
    let Some(config) = sh_config() else {
        return;
    };
    let mut process = PtyProcess::spawn(&config).unwrap();
    let liveness = process.liveness();

    process.write(b"exit 0\n").unwrap();
    let (outcome, _) = read_for(&mut process, "never-printed", Duration::from_secs(5)).await;

    assert_eq!(outcome, ReadOutcome::Closed);
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while liveness.is_alive() && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!liveness.is_alive());
}

#[tokio::test]
async fn test_terminate_is_idempotent() {
    let Some(config) = sh_config() else {
        return;
    };
    let mut process = PtyProcess::spawn(&config).unwrap();
    let liveness = process.liveness();

    process.terminate(Duration::from_millis(500)).await.unwrap();
    process.terminate(Duration::from_millis(500)).await.unwrap();

    assert!(!process.is_alive());
    assert!(!liveness.is_alive());
}

#[tokio::test]
async fn test_spawn_failures() {
    let missing_shell = SpawnConfig::new("/nonexistent/bin/shell", std::env::temp_dir());
    assert!(matches!(
        PtyProcess::spawn(&missing_shell),
        Err(Error::SpawnFailed { .. })
    ));

    let missing_cwd = SpawnConfig::new("/bin/sh", "/nonexistent/working/dir");
    assert!(matches!(
        PtyProcess::spawn(&missing_cwd),
        Err(Error::SpawnFailed { .. })
    ));
}
