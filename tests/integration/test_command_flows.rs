//! Integration Tests for Command Flows
//!
//! End-to-end command sequences against a real bash session, checking that
//! shell state (cwd, variables, functions) carries over between commands.

use futures::future::join_all;
use persistent_shell::{CommandRequest, CommandStatus, Config, SessionManager, SessionState};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn test_config(workspace: &Path) -> Config {
    let mut config = Config::default();
    config.security.working_directory = workspace.to_path_buf();
    config
}

async fn start(config: Config) -> Option<Arc<SessionManager>> {
    if !Path::new("/bin/bash").exists() {
        eprintln!("skipping: /bin/bash not available");
        return None;
    }
    let manager = Arc::new(SessionManager::new(&config).expect("valid config"));
    manager.start().await.expect("shell should start");
    Some(manager)
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap()
}

#[tokio::test]
async fn test_cwd_persists_between_commands() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::create_dir(workspace.path().join("sub")).unwrap();
    let Some(manager) = start(test_config(workspace.path())).await else {
        return;
    };

    let initial = manager.get_working_directory();
    assert_eq!(initial, canonical(workspace.path()));

    let result = manager.execute_command(CommandRequest::new("cd sub")).await;
    assert!(result.is_success(), "cd failed: {:?}", result);

    let result = manager.execute_command(CommandRequest::new("pwd")).await;
    let expected = canonical(&workspace.path().join("sub"));
    assert_eq!(result.stdout, expected.to_string_lossy());
    assert_eq!(manager.get_working_directory(), expected);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_environment_and_functions_persist() {
    let workspace = tempfile::tempdir().unwrap();
    let Some(manager) = start(test_config(workspace.path())).await else {
        return;
    };

    manager
        .execute_command(CommandRequest::new("export GREETING=hello"))
        .await;
    manager
        .execute_command(CommandRequest::new("greet() { echo \"$GREETING $1\"; }"))
        .await;

    let result = manager.execute_command(CommandRequest::new("greet world")).await;
    assert!(result.is_success());
    assert_eq!(result.stdout, "hello world");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_exit_codes_are_reported() {
    let workspace = tempfile::tempdir().unwrap();
    let Some(manager) = start(test_config(workspace.path())).await else {
        return;
    };

    let result = manager.execute_command(CommandRequest::new("false")).await;
    assert_eq!(result.status, CommandStatus::Success);
    assert_eq!(result.exit_code, Some(1));
    assert!(!result.is_success());

    let result = manager.execute_command(CommandRequest::new("(exit 42)")).await;
    assert_eq!(result.exit_code, Some(42));

    let result = manager
        .execute_command(CommandRequest::new("definitely-not-a-command-xyz"))
        .await;
    assert_eq!(result.exit_code, Some(127));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_stderr_is_merged_into_output() {
    let workspace = tempfile::tempdir().unwrap();
    let Some(manager) = start(test_config(workspace.path())).await else {
        return;
    };

    let result = manager
        .execute_command(CommandRequest::new("echo out; echo err 1>&2"))
        .await;
    assert!(result.is_success());
    assert!(result.stdout.contains("out"));
    assert!(result.stdout.contains("err"));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_multiline_output_and_quoting() {
    let workspace = tempfile::tempdir().unwrap();
    let Some(manager) = start(test_config(workspace.path())).await else {
        return;
    };

    let result = manager
        .execute_command(CommandRequest::new("printf 'a  b\\nc\\td\\n'"))
        .await;
    assert_eq!(result.stdout, "a  b\nc\td");

    let result = manager
        .execute_command(CommandRequest::new("echo \"$((6 * 7))\" '$HOME'"))
        .await;
    assert_eq!(result.stdout, "42 $HOME");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_marker_lookalike_output_is_plain_output() {
    let workspace = tempfile::tempdir().unwrap();
    let Some(manager) = start(test_config(workspace.path())).await else {
        return;
    };
    let cwd = manager.get_working_directory();

    let result = manager
        .execute_command(CommandRequest::new(
            "echo '__PSH_0123456789abcdef0123456789abcdef__9__/nowhere__END__'",
        ))
        .await;
    assert!(result.is_success());
    assert!(result.stdout.contains("__PSH_"));
    assert_eq!(manager.get_working_directory(), cwd);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_commands_run_exactly_once() {
    let workspace = tempfile::tempdir().unwrap();
    let Some(manager) = start(test_config(workspace.path())).await else {
        return;
    };

    let runs = (0..6).map(|i| {
        let manager = Arc::clone(&manager);
        async move {
            manager
                .execute_command(CommandRequest::new(format!("echo {} >> log.txt; echo {}", i, i)))
                .await
        }
    });
    let results = join_all(runs).await;

    for (i, result) in results.iter().enumerate() {
        assert!(result.is_success());
        assert_eq!(result.stdout, i.to_string());
    }

    let log = std::fs::read_to_string(workspace.path().join("log.txt")).unwrap();
    assert_eq!(log.lines().count(), 6);
    assert_eq!(manager.health().commands_executed, 6);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_earlier_command_finishes_first() {
    let workspace = tempfile::tempdir().unwrap();
    let Some(manager) = start(test_config(workspace.path())).await else {
        return;
    };
    let finished = Arc::new(AtomicUsize::new(0));

    let slow = {
        let manager = Arc::clone(&manager);
        let finished = Arc::clone(&finished);
        tokio::spawn(async move {
            let result = manager
                .execute_command(CommandRequest::new("sleep 2; echo slow"))
                .await;
            (finished.fetch_add(1, Ordering::SeqCst), result)
        })
    };
    while manager.health().state != SessionState::Busy {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let fast = {
        let manager = Arc::clone(&manager);
        let finished = Arc::clone(&finished);
        tokio::spawn(async move {
            let result = manager.execute_command(CommandRequest::new("echo done")).await;
            (finished.fetch_add(1, Ordering::SeqCst), result)
        })
    };
    while manager.health().queue_depth == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(manager.health().queue_depth, 1);

    let (slow_rank, slow) = slow.await.unwrap();
    let (fast_rank, fast) = fast.await.unwrap();

    assert_eq!(slow.stdout, "slow");
    assert_eq!(fast.stdout, "done");
    assert_eq!((slow_rank, fast_rank), (0, 1));
    assert!(slow.finished_at < fast.finished_at);
    assert!(slow.execution_time >= 2.0);
    assert_eq!(manager.health().queue_depth, 0);

    manager.shutdown().await;
}
