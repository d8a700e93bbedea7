// ABOUTME: Background-daemon support: PID file handling, daemonize, stop/status
// ABOUTME: Unix-only process management; other platforms run in the foreground

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Directory for daemon state files (`~/.mssql-mysql-replicator/`).
pub fn get_daemon_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("failed to determine home directory")?;
    let daemon_dir = home.join(".mssql-mysql-replicator");

    if !daemon_dir.exists() {
        fs::create_dir_all(&daemon_dir)
            .with_context(|| format!("failed to create daemon directory {daemon_dir:?}"))?;
    }

    Ok(daemon_dir)
}

pub fn get_pid_file_path() -> Result<PathBuf> {
    Ok(get_daemon_dir()?.join("replicator.pid"))
}

pub fn get_log_file_path() -> Result<PathBuf> {
    Ok(get_daemon_dir()?.join("replicator.log"))
}

#[cfg(unix)]
fn is_process_running(pid: i32) -> bool {
    // Signal 0 checks for existence without delivering anything.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: i32) -> bool {
    false
}

pub fn read_pid() -> Result<Option<i32>> {
    let pid_file = get_pid_file_path()?;

    if !pid_file.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&pid_file)
        .with_context(|| format!("failed to read PID file {pid_file:?}"))?;
    let pid: i32 = content
        .trim()
        .parse()
        .with_context(|| format!("invalid PID in file: {}", content.trim()))?;

    Ok(Some(pid))
}

pub fn write_pid() -> Result<()> {
    let pid_file = get_pid_file_path()?;
    fs::write(&pid_file, std::process::id().to_string())
        .with_context(|| format!("failed to write PID file {pid_file:?}"))
}

pub fn remove_pid_file() -> Result<()> {
    let pid_file = get_pid_file_path()?;
    if pid_file.exists() {
        fs::remove_file(&pid_file)
            .with_context(|| format!("failed to remove PID file {pid_file:?}"))?;
    }
    Ok(())
}

#[derive(Debug)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<i32>,
    pub pid_file_exists: bool,
}

pub fn check_status() -> Result<DaemonStatus> {
    let pid_file_exists = get_pid_file_path()?.exists();

    let (running, pid) = match read_pid()? {
        Some(pid) => (is_process_running(pid), Some(pid)),
        None => (false, None),
    };

    Ok(DaemonStatus {
        running,
        pid,
        pid_file_exists,
    })
}

pub fn print_status() -> Result<()> {
    let status = check_status()?;
    if status.running {
        println!("Replicator daemon is running (PID: {})", status.pid.unwrap());
    } else if status.pid_file_exists {
        println!("Replicator daemon is not running (stale PID file)");
    } else {
        println!("Replicator daemon is not running");
    }
    Ok(())
}

/// Stop a running daemon: SIGTERM, escalating to SIGKILL after 10 seconds.
/// Returns false when nothing was running.
#[cfg(unix)]
pub fn stop_daemon() -> Result<bool> {
    let status = check_status()?;

    if !status.running {
        if status.pid_file_exists {
            remove_pid_file()?;
            println!("Removed stale PID file (process was not running)");
        }
        return Ok(false);
    }

    let pid = status.pid.unwrap();
    println!("Sending SIGTERM to daemon (PID: {pid})");

    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        anyhow::bail!(
            "failed to send SIGTERM to process {pid}: {}",
            std::io::Error::last_os_error()
        );
    }

    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(10);

    while is_process_running(pid) {
        if start.elapsed() > timeout {
            println!("Process didn't exit within 10 seconds, sending SIGKILL");
            unsafe { libc::kill(pid, libc::SIGKILL) };
            std::thread::sleep(std::time::Duration::from_millis(500));
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    remove_pid_file()?;
    Ok(true)
}

#[cfg(not(unix))]
pub fn stop_daemon() -> Result<bool> {
    anyhow::bail!("daemon management is only supported on unix")
}

/// Fork into the background, writing the PID file and redirecting output to
/// the daemon log file.
#[cfg(unix)]
pub fn daemonize() -> Result<()> {
    use daemonize::Daemonize;
    use std::fs::OpenOptions;

    let status = check_status()?;
    if status.running {
        anyhow::bail!(
            "daemon already running (PID: {}); stop it first",
            status.pid.unwrap()
        );
    }

    let pid_file = get_pid_file_path()?;
    let log_file = get_log_file_path()?;
    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("failed to open daemon log {log_file:?}"))?;
    let stderr = stdout
        .try_clone()
        .context("failed to clone daemon log handle")?;

    Daemonize::new()
        .pid_file(&pid_file)
        .working_directory(std::env::current_dir()?)
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("failed to daemonize")?;

    Ok(())
}

#[cfg(not(unix))]
pub fn daemonize() -> Result<()> {
    anyhow::bail!("daemon mode is only supported on unix")
}

/// Remove the PID file on graceful shutdown.
pub fn cleanup() -> Result<()> {
    remove_pid_file()
}
