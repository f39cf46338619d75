//! One-shot subprocess invocation with captured output and a hard deadline.
//!
//! Used for the pre-spawn `--version` probe and for ad hoc CLI passthrough
//! (`pull`, `show`, ...). The child is killed when the deadline expires.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of a captured run. `exit_code` is None when the process was
/// killed on timeout or ended on a signal.
#[derive(Debug)]
pub struct CaptureResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Run `binary args...` with the given extra environment, capturing stdout
/// and stderr, enforcing `timeout`. Errors only when the process cannot be
/// spawned at all.
pub fn run_captured(
    binary: &Path,
    args: &[&str],
    extra_env: &[(String, String)],
    timeout: Duration,
) -> Result<CaptureResult, String> {
    let start = Instant::now();

    let mut command = Command::new(binary);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in extra_env {
        command.env(key, value);
    }

    let mut child = command
        .spawn()
        .map_err(|e| format!("Failed to run {}: {e}", binary.display()))?;

    // Reader threads keep the pipes drained so a chatty child cannot block
    // on a full pipe before the deadline check sees it.
    let stdout_handle = child.stdout.take().map(spawn_pipe_reader);
    let stderr_handle = child.stderr.take().map(spawn_pipe_reader);

    let deadline = start + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {}
            Err(_) => break None,
        }
        if Instant::now() >= deadline {
            break None;
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    };

    let timed_out = status.is_none();
    if timed_out {
        let _ = child.kill();
        let _ = child.wait();
    }

    let stdout = join_reader(stdout_handle);
    let stderr = join_reader(stderr_handle);

    Ok(CaptureResult {
        success: status.map(|s| s.success()).unwrap_or(false),
        exit_code: status.and_then(|s| s.code()),
        timed_out,
        stdout,
        stderr,
        duration: start.elapsed(),
    })
}

fn spawn_pipe_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn script(label: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "ollama_supervisor_cmd_{label}_{}.sh",
            std::process::id()
        ));
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn captures_stdout_and_stderr() {
        let bin = script("capture", "echo out-line\necho err-line >&2\nexit 0");
        let result = run_captured(&bin, &[], &[], Duration::from_secs(5)).unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.timed_out);
        assert!(result.stdout.contains("out-line"));
        assert!(result.stderr.contains("err-line"));
        let _ = fs::remove_file(&bin);
    }

    #[test]
    fn reports_nonzero_exit() {
        let bin = script("exitcode", "exit 3");
        let result = run_captured(&bin, &[], &[], Duration::from_secs(5)).unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        let _ = fs::remove_file(&bin);
    }

    #[test]
    fn passes_arguments_and_environment() {
        let bin = script("args", "echo \"$1 $CHECK_VALUE\"");
        let result = run_captured(
            &bin,
            &["hello"],
            &[("CHECK_VALUE".to_string(), "world".to_string())],
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(result.stdout.contains("hello world"));
        let _ = fs::remove_file(&bin);
    }

    #[test]
    fn kills_child_on_timeout() {
        let bin = script("timeout", "sleep 30");
        let start = Instant::now();
        let result = run_captured(&bin, &[], &[], Duration::from_millis(300)).unwrap();
        assert!(result.timed_out);
        assert!(!result.success);
        assert!(result.exit_code.is_none());
        assert!(start.elapsed() < Duration::from_secs(5));
        let _ = fs::remove_file(&bin);
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let missing = std::env::temp_dir().join("ollama_supervisor_cmd_missing");
        let result = run_captured(&missing, &[], &[], Duration::from_secs(1));
        assert!(result.is_err());
    }
}
