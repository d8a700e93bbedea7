use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_status_command_without_daemon() {
    let temp_dir = tempdir().unwrap();
    let bin_path = env!("CARGO_BIN_EXE_mssql-mysql-replicator");

    let output = Command::new(bin_path)
        .arg("status")
        .env("HOME", temp_dir.path())
        .output()
        .expect("failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("Replicator daemon is not running"));
}

#[test]
fn test_stop_command_without_daemon() {
    let temp_dir = tempdir().unwrap();
    let bin_path = env!("CARGO_BIN_EXE_mssql-mysql-replicator");

    let output = Command::new(bin_path)
        .arg("stop")
        .env("HOME", temp_dir.path())
        .output()
        .expect("failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("was not running"));
}

#[test]
fn test_sync_fails_without_settings_file() {
    let temp_dir = tempdir().unwrap();
    let bin_path = env!("CARGO_BIN_EXE_mssql-mysql-replicator");

    let output = Command::new(bin_path)
        .arg("--config")
        .arg(temp_dir.path().join("missing.toml"))
        .arg("sync")
        .env("HOME", temp_dir.path())
        .output()
        .expect("failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read settings"));
}
