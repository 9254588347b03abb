//! Contract Tests for Command Execution
//!
//! The shape of results returned by `execute_command` and the other session
//! operations, as seen by an external caller serializing them to JSON.

use persistent_shell::{CommandRequest, CommandStatus, Config, SessionManager};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

async fn start(config_fn: impl FnOnce(&mut Config)) -> Option<(tempfile::TempDir, Arc<SessionManager>)> {
    if !Path::new("/bin/bash").exists() {
        eprintln!("skipping: /bin/bash not available");
        return None;
    }
    let workspace = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.security.working_directory = workspace.path().to_path_buf();
    config_fn(&mut config);

    let manager = Arc::new(SessionManager::new(&config).unwrap());
    manager.start().await.unwrap();
    Some((workspace, manager))
}

fn assert_result_shape(json: &Value) {
    for field in [
        "status",
        "exit_code",
        "stdout",
        "stderr",
        "command",
        "execution_time",
        "truncated",
    ] {
        assert!(json.get(field).is_some(), "missing field {}", field);
    }
}

#[tokio::test]
async fn test_success_result_contract() {
    let Some((_workspace, manager)) = start(|_| {}).await else {
        return;
    };

    let result = manager.execute_command(CommandRequest::new("echo hello")).await;
    let json = serde_json::to_value(&result).unwrap();

    assert_result_shape(&json);
    assert_eq!(json["status"], "success");
    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["stdout"], "hello");
    assert_eq!(json["stderr"], "");
    assert_eq!(json["command"], "echo hello");
    assert_eq!(json["truncated"], false);
    assert!(json["execution_time"].as_f64().unwrap() >= 0.0);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_timeout_result_contract() {
    let Some((_workspace, manager)) = start(|_| {}).await else {
        return;
    };

    let result = manager
        .execute_command(CommandRequest::new("sleep 10").with_timeout_secs(1))
        .await;
    let json = serde_json::to_value(&result).unwrap();

    assert_result_shape(&json);
    assert_eq!(json["status"], "timeout");
    assert!(json["exit_code"].is_null());
    assert!(json["execution_time"].as_f64().unwrap() >= 1.0);
    assert!(json["stderr"].as_str().unwrap().contains("timed out"));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_timeout_is_clamped_to_policy_maximum() {
    let Some((_workspace, manager)) = start(|c| c.security.max_execution_time = 1).await else {
        return;
    };

    let result = manager
        .execute_command(CommandRequest::new("sleep 10").with_timeout_secs(300))
        .await;
    assert_eq!(result.status, CommandStatus::Timeout);
    assert!(result.execution_time < 6.0);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_rejected_result_contract() {
    let Some((workspace, manager)) = start(|c| {
        c.security.enabled = true;
        c.security.allowed_executables = vec!["echo".to_string()];
    })
    .await
    else {
        return;
    };

    let result = manager
        .execute_command(CommandRequest::new("touch created.txt"))
        .await;
    let json = serde_json::to_value(&result).unwrap();

    assert_result_shape(&json);
    assert_eq!(json["status"], "rejected");
    assert!(json["stderr"].as_str().unwrap().contains("touch"));
    assert!(!workspace.path().join("created.txt").exists());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_working_directory_and_reset_contract() {
    let Some((workspace, manager)) = start(|_| {}).await else {
        return;
    };
    let initial = workspace.path().canonicalize().unwrap();

    assert_eq!(manager.get_working_directory(), initial);

    manager.execute_command(CommandRequest::new("cd /")).await;
    assert_eq!(manager.get_working_directory(), Path::new("/"));
    assert_eq!(manager.resolve_path("etc"), Path::new("/etc"));

    assert_eq!(manager.reset_session().await.unwrap(), initial);
    assert_eq!(manager.get_working_directory(), initial);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_health_contract() {
    let Some((_workspace, manager)) = start(|_| {}).await else {
        return;
    };

    let json = serde_json::to_value(manager.health()).unwrap();
    for field in ["status", "shell_alive", "security_enabled", "state", "queue_depth"] {
        assert!(json.get(field).is_some(), "missing field {}", field);
    }
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["shell_alive"], true);
    assert_eq!(json["security_enabled"], false);
    assert_eq!(json["state"], "ready");
    assert_eq!(json["queue_depth"], 0);

    manager.shutdown().await;
    assert_eq!(serde_json::to_value(manager.health()).unwrap()["shell_alive"], false);
}
