//! Unit Tests for Configuration Loading
//!
//! File discovery, TOML and JSON parsing, environment overrides and range
//! validation.

use persistent_shell::config::loader::{apply_env_overrides, validate_config};
use persistent_shell::config::LogFormat;
use persistent_shell::{Config, ConfigLoader, Error};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_load_toml_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[shell]
shell_path = "/bin/sh"

[session]
idle_timeout_secs = 0

[security]
enabled = true
max_execution_time = 120
max_output_size = 65536
working_directory = "/srv"

[logging]
level = "debug"
format = "console"
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_path(&path).unwrap();
    assert_eq!(config.shell.shell_path, PathBuf::from("/bin/sh"));
    assert_eq!(config.session.idle_timeout(), None);
    assert!(config.security.enabled);
    assert_eq!(config.security.max_execution_time, 120);
    assert_eq!(config.security.max_output_size, 65536);
    assert_eq!(config.security.working_directory, PathBuf::from("/srv"));
    assert_eq!(config.logging.format, LogFormat::Console);
    assert!(validate_config(&config).is_ok());
}

#[test]
fn test_load_json_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{"security": {"allowed_executables": ["ls"], "blocked_patterns": ["sudo"]}}"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_path(&path).unwrap();
    assert_eq!(config.security.allowed_executables, vec!["ls"]);
    assert_eq!(config.security.blocked_patterns, vec!["sudo"]);
    assert_eq!(config.security.max_execution_time, 30);
}

#[test]
fn test_parse_errors_name_the_format() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[security\nenabled = ").unwrap();

    match ConfigLoader::load_from_path(&path) {
        Err(Error::ConfigParseFailed { format, .. }) => assert_eq!(format, "TOML"),
        other => panic!("expected parse failure, got {:?}", other),
    }
}

#[test]
fn test_missing_file_is_load_error() {
    let result = ConfigLoader::load_from_path(&PathBuf::from("/nonexistent/persistent-shell.toml"));
    assert!(matches!(result, Err(Error::ConfigLoadFailed { .. })));
}

#[test]
fn test_search_path_order_and_defaults() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first.toml");
    let second = dir.path().join("second.toml");
    fs::write(&second, "[security]\nmax_execution_time = 7\n").unwrap();

    let loader = ConfigLoader::with_search_paths(vec![first.clone(), second.clone()]);
    assert_eq!(loader.find_config_file(), Some(second.clone()));
    let config = loader.load_with_env(env(&[])).unwrap();
    assert_eq!(config.security.max_execution_time, 7);

    fs::write(&first, "[security]\nmax_execution_time = 9\n").unwrap();
    let config = loader.load_with_env(env(&[])).unwrap();
    assert_eq!(config.security.max_execution_time, 9);

    let empty = ConfigLoader::with_search_paths(vec![dir.path().join("none.toml")]);
    let config = empty.load_with_env(env(&[])).unwrap();
    assert_eq!(config.security.max_execution_time, 30);
}

#[test]
fn test_env_overrides_win_over_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[security]\nmax_execution_time = 7\n").unwrap();

    let loader = ConfigLoader::with_search_paths(vec![path]);
    let config = loader
        .load_with_env(env(&[
            ("PERSISTENT_SHELL_SECURITY__MAX_EXECUTION_TIME", "45"),
            ("PERSISTENT_SHELL_SHELL__SHELL_PATH", "/bin/zsh"),
        ]))
        .unwrap();

    assert_eq!(config.security.max_execution_time, 45);
    assert_eq!(config.shell.shell_path, PathBuf::from("/bin/zsh"));
}

#[test]
fn test_audit_log_flag() {
    assert!(Config::default().security.audit_log);
    assert!(Config::default().security.to_policy().audit_log);

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[security]\nenabled = true\naudit_log = false\n").unwrap();
    let loader = ConfigLoader::with_search_paths(vec![path]);

    let config = loader.load_with_env(env(&[])).unwrap();
    assert!(!config.security.audit_log);
    assert!(!config.security.to_policy().audit_log);

    let config = loader
        .load_with_env(env(&[("PERSISTENT_SHELL_SECURITY__AUDIT_LOG", "true")]))
        .unwrap();
    assert!(config.security.audit_log);
}

#[test]
fn test_env_override_failing_validation_is_rejected() {
    let loader = ConfigLoader::with_search_paths(Vec::new());
    let result = loader.load_with_env(env(&[(
        "PERSISTENT_SHELL_SECURITY__MAX_EXECUTION_TIME",
        "301",
    )]));

    match result {
        Err(Error::ConfigValidationFailed { field, .. }) => {
            assert_eq!(field, "security.max_execution_time")
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
}

#[test]
fn test_apply_env_overrides_without_matches_is_identity() {
    let config = apply_env_overrides(Config::default(), env(&[("HOME", "/root")])).unwrap();
    assert_eq!(config.security.max_output_size, 1_048_576);
    assert_eq!(config.session.probe_interval(), Duration::from_secs(5));
}

#[test]
fn test_validation_boundaries() {
    let mut config = Config::default();
    config.security.max_execution_time = 300;
    config.security.max_output_size = 1024;
    config.session.idle_timeout_secs = 60;
    assert!(validate_config(&config).is_ok());

    config.security.max_output_size = 10 * 1024 * 1024 + 1;
    assert!(validate_config(&config).is_err());

    let mut config = Config::default();
    config.session.probe_interval_secs = 0;
    assert!(validate_config(&config).is_err());

    let mut config = Config::default();
    config.shell.shell_path = PathBuf::new();
    assert!(validate_config(&config).is_err());
}
