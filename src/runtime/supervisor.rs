//! Ensure-running orchestration for the local Ollama server.
//!
//! A single supervisor instance is constructed once per process and shared by
//! reference. It owns the startup lock, the selected-binary cache, and the
//! report store; spawned servers are fire-and-ensure-ready, never owned.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::runtime::client::ApiClient;
use crate::runtime::command::run_captured;
use crate::runtime::crash::{is_accel_crash, tail};
use crate::runtime::health::{HealthChecker, DEFAULT_API_BASE};
use crate::runtime::locator::{BinaryLocator, LocatorConfig};
use crate::runtime::models::{
    round_secs, AttemptOutcome, BinaryCandidate, FailureReason, ProbeResult, StartupAttempt,
    StartupReport,
};
use crate::runtime::report_store::ReportStore;
use crate::{log_error, log_info, log_warn};

/// Default overall budget for one candidate to become healthy.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(2);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const PULL_TIMEOUT: Duration = Duration::from_secs(300);

const STDOUT_TAIL_BYTES: usize = 500;
const STDERR_TAIL_BYTES: usize = 4000;

/// The only error surfaced to callers. Everything else is absorbed into the
/// boolean result plus the startup report.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Another caller held the startup lock for the whole acquisition
    /// window. Signals contention, not absence of the server.
    #[error("timed out acquiring the startup lock after {0:?}")]
    LockTimeout(Duration),
}

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub api_base: String,
    pub locator: LocatorConfig,
    /// Override for the diagnostics state directory; None resolves the
    /// platform default.
    pub state_dir: Option<PathBuf>,
    pub lock_timeout: Duration,
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    pub terminate_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            locator: LocatorConfig::from_env(),
            state_dir: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        }
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    locator: BinaryLocator,
    health: HealthChecker,
    client: ApiClient,
    store: ReportStore,
    startup_lock: Mutex<()>,
    selected: Mutex<Option<PathBuf>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::with_config(SupervisorConfig::default())
    }

    pub fn with_config(config: SupervisorConfig) -> Self {
        let store = match &config.state_dir {
            Some(dir) => ReportStore::with_state_dir(dir.clone()),
            None => ReportStore::new(),
        };
        Self {
            locator: BinaryLocator::new(config.locator.clone()),
            health: HealthChecker::new(&config.api_base),
            client: ApiClient::new(&config.api_base),
            store,
            startup_lock: Mutex::new(()),
            selected: Mutex::new(None),
            config,
        }
    }

    /// Whether the server currently answers on its local API.
    pub fn is_running(&self) -> bool {
        self.health.is_running()
    }

    /// Latest startup report (this process, else the persisted one).
    pub fn last_report(&self) -> StartupReport {
        self.store.get()
    }

    /// Ensure the server is available, starting it if necessary.
    ///
    /// With `wait`, polls health until `timeout` per candidate; without,
    /// declares success as soon as a probed candidate has been spawned
    /// (fire-and-forget, no readiness confirmation).
    ///
    /// Returns false on `binary_not_found` / `startup_failed` (details in the
    /// report); errors only on startup-lock contention.
    pub fn ensure_running(&self, wait: bool, timeout: Duration) -> Result<bool, SupervisorError> {
        // Fast path: no lock when the server is already reachable.
        if self.health.is_running() {
            log_info!("supervisor", "Ollama server is already running");
            self.store.set(StartupReport::already_running());
            return Ok(true);
        }

        let _guard = self.acquire_startup_lock()?;

        // A racing caller may have started the server while we waited.
        if self.health.is_running() {
            self.store.set(StartupReport::already_running());
            return Ok(true);
        }

        let preferred = self.preferred_binary();
        let candidates = self.locator.candidates(preferred.as_deref());
        if candidates.is_empty() {
            log_error!("supervisor", "Cannot start Ollama - binary not found");
            self.store
                .set(StartupReport::failed(FailureReason::BinaryNotFound, vec![]));
            return Ok(false);
        }

        let mut attempts: Vec<StartupAttempt> = Vec::new();

        for candidate in &candidates {
            let probe = self.probe_candidate(candidate);
            if !probe.ok {
                log_warn!(
                    "supervisor",
                    "Skipping candidate {} after failed probe (exit={:?})",
                    candidate.display_path(),
                    probe.exit_code
                );
                attempts.push(StartupAttempt::skipped(candidate, probe));
                continue;
            }

            log_info!("supervisor", "Starting Ollama server: {}", candidate.display_path());
            let (mut child, mut capture) = match self.spawn_server(candidate) {
                Ok(spawned) => spawned,
                Err(err) => {
                    log_warn!("supervisor", "{}", err);
                    attempts.push(StartupAttempt {
                        binary: candidate.display_path(),
                        probe,
                        pid: None,
                        outcome: AttemptOutcome::SpawnedCrashed,
                        exit_code: None,
                        stderr_tail: Some(err),
                        accel_crash: Some(false),
                        ready_after_s: None,
                    });
                    continue;
                }
            };
            let pid = child.id();

            if !wait {
                // Fire-and-forget: the probe passed and the process exists;
                // readiness is not confirmed.
                self.set_selected(&candidate.path);
                attempts.push(StartupAttempt {
                    binary: candidate.display_path(),
                    probe,
                    pid: Some(pid),
                    outcome: AttemptOutcome::SpawnedReady,
                    exit_code: None,
                    stderr_tail: None,
                    accel_crash: None,
                    ready_after_s: None,
                });
                self.store.set(StartupReport::spawned(
                    candidate.display_path(),
                    false,
                    None,
                    attempts,
                ));
                return Ok(true);
            }

            match self.wait_for_ready(&mut child, timeout) {
                WaitOutcome::Ready(ready_after_s) => {
                    log_info!("supervisor", "Ollama server is ready");
                    self.set_selected(&candidate.path);
                    attempts.push(StartupAttempt {
                        binary: candidate.display_path(),
                        probe,
                        pid: Some(pid),
                        outcome: AttemptOutcome::SpawnedReady,
                        exit_code: None,
                        stderr_tail: None,
                        accel_crash: None,
                        ready_after_s: Some(ready_after_s),
                    });
                    self.store.set(StartupReport::spawned(
                        candidate.display_path(),
                        true,
                        Some(ready_after_s),
                        attempts,
                    ));
                    return Ok(true);
                }
                WaitOutcome::Exited { exit_code } => {
                    let stderr_tail = capture.finish();
                    log_warn!(
                        "supervisor",
                        "Candidate {} exited early (exit={:?})",
                        candidate.display_path(),
                        exit_code
                    );
                    attempts.push(StartupAttempt {
                        binary: candidate.display_path(),
                        probe,
                        pid: Some(pid),
                        outcome: AttemptOutcome::SpawnedCrashed,
                        exit_code,
                        accel_crash: Some(is_accel_crash(&stderr_tail)),
                        stderr_tail: Some(stderr_tail),
                        ready_after_s: None,
                    });
                }
                WaitOutcome::TimedOut => {
                    // Never abandon a process we spawned: terminate before
                    // moving on to the next candidate.
                    self.terminate_spawned(&mut child);
                    let stderr_tail = capture.finish();
                    log_warn!(
                        "supervisor",
                        "Candidate {} did not become healthy within {:?}; terminated",
                        candidate.display_path(),
                        timeout
                    );
                    attempts.push(StartupAttempt {
                        binary: candidate.display_path(),
                        probe,
                        pid: Some(pid),
                        outcome: AttemptOutcome::SpawnedTimeout,
                        exit_code: None,
                        accel_crash: Some(is_accel_crash(&stderr_tail)),
                        stderr_tail: Some(stderr_tail),
                        ready_after_s: None,
                    });
                }
            }
        }

        log_error!(
            "supervisor",
            "Ollama server failed to start after trying {} candidate(s)",
            attempts.len()
        );
        self.store
            .set(StartupReport::failed(FailureReason::StartupFailed, attempts));
        Ok(false)
    }

    /// Run an ad hoc CLI command against the resolved binary.
    pub fn run_command(&self, args: &[&str], timeout: Duration) -> (bool, String, String) {
        let Some(binary) = self.resolve_binary() else {
            return (false, String::new(), "Ollama binary not found".to_string());
        };
        let env = self.locator.runtime_env(&binary);
        match run_captured(&binary, args, &env, timeout) {
            Ok(result) if result.timed_out => (
                false,
                result.stdout,
                format!("Command timed out after {} seconds", timeout.as_secs()),
            ),
            Ok(result) => (result.success, result.stdout, result.stderr),
            Err(err) => (false, String::new(), err),
        }
    }

    /// Installed model names, starting the server first when needed. Empty
    /// on failure; never errors.
    pub fn list_models(&self) -> Vec<String> {
        if !self.health.is_running()
            && !self
                .ensure_running(true, DEFAULT_STARTUP_TIMEOUT)
                .unwrap_or(false)
        {
            return Vec::new();
        }
        self.client.list_models()
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.list_models().iter().any(|model| model == name)
    }

    /// Pull a model through the CLI. Returns false when the server cannot be
    /// started or the pull fails.
    pub fn pull_model(&self, name: &str) -> bool {
        if !self
            .ensure_running(true, DEFAULT_STARTUP_TIMEOUT)
            .unwrap_or(false)
        {
            return false;
        }
        log_info!("supervisor", "Pulling model: {}", name);
        let (ok, _stdout, stderr) = self.run_command(&["pull", name], PULL_TIMEOUT);
        if !ok {
            log_error!(
                "supervisor",
                "Failed to pull model {}: {}",
                name,
                tail(&stderr, STDOUT_TAIL_BYTES)
            );
        }
        ok
    }

    /// Binary used for CLI passthrough: the confirmed selection when one
    /// exists, else the best-ranked discovery candidate.
    pub fn resolve_binary(&self) -> Option<PathBuf> {
        if let Some(path) = self.cached_selected() {
            return Some(path);
        }
        self.locator
            .candidates(self.preferred_binary().as_deref())
            .first()
            .map(|candidate| candidate.path.clone())
    }

    fn acquire_startup_lock(&self) -> Result<MutexGuard<'_, ()>, SupervisorError> {
        let deadline = Instant::now() + self.config.lock_timeout;
        loop {
            match self.startup_lock.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {}
            }
            if Instant::now() >= deadline {
                return Err(SupervisorError::LockTimeout(self.config.lock_timeout));
            }
            thread::sleep(LOCK_RETRY_INTERVAL);
        }
    }

    /// Previously-successful binary: in-memory cache first, else the path
    /// recorded in the last persisted report.
    fn preferred_binary(&self) -> Option<PathBuf> {
        if let Some(path) = self.cached_selected() {
            return Some(path);
        }
        self.store
            .get()
            .selected_binary
            .map(PathBuf::from)
            .filter(|path| path.exists())
    }

    fn cached_selected(&self) -> Option<PathBuf> {
        self.selected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .filter(|path| path.exists())
    }

    fn set_selected(&self, path: &Path) {
        let mut selected = self
            .selected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *selected = Some(path.to_path_buf());
    }

    /// Quick `--version` run to catch immediate fatal failures before
    /// committing to a long-running server process.
    fn probe_candidate(&self, candidate: &BinaryCandidate) -> ProbeResult {
        let env = self.locator.runtime_env(&candidate.path);
        match run_captured(
            &candidate.path,
            &["--version"],
            &env,
            self.config.probe_timeout,
        ) {
            Ok(result) => {
                let stderr_tail = if result.timed_out {
                    format!(
                        "Probe timed out after {:.1}s",
                        self.config.probe_timeout.as_secs_f64()
                    )
                } else {
                    tail(&result.stderr, STDERR_TAIL_BYTES)
                };
                ProbeResult {
                    binary: candidate.display_path(),
                    ok: !result.timed_out && result.success,
                    exit_code: result.exit_code,
                    duration_s: round_secs(result.duration.as_secs_f64()),
                    stdout: tail(&result.stdout, STDOUT_TAIL_BYTES),
                    accel_crash: is_accel_crash(&stderr_tail),
                    stderr_tail,
                }
            }
            Err(err) => ProbeResult {
                binary: candidate.display_path(),
                ok: false,
                exit_code: None,
                duration_s: 0.0,
                stdout: String::new(),
                stderr_tail: err,
                accel_crash: false,
            },
        }
    }

    /// Spawn `<binary> serve` in its own session so it outlives the caller.
    /// Stdout is discarded; stderr feeds the crash diagnostics capture.
    fn spawn_server(
        &self,
        candidate: &BinaryCandidate,
    ) -> Result<(Child, StderrCapture), String> {
        let mut command = Command::new(&candidate.path);
        command
            .arg("serve")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        for (key, value) in self.locator.runtime_env(&candidate.path) {
            command.env(key, value);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                command.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = command.spawn().map_err(|e| {
            format!("Failed to spawn {} serve: {e}", candidate.display_path())
        })?;
        let capture = StderrCapture::attach(&mut child);
        Ok((child, capture))
    }

    fn wait_for_ready(&self, child: &mut Child, timeout: Duration) -> WaitOutcome {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            if self.health.is_running() {
                return WaitOutcome::Ready(round_secs(started.elapsed().as_secs_f64()));
            }
            if let Ok(Some(status)) = child.try_wait() {
                return WaitOutcome::Exited {
                    exit_code: status.code(),
                };
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            thread::sleep(self.config.poll_interval.min(deadline - now));
        }
    }

    /// Graceful signal, bounded grace period, then forced kill.
    fn terminate_spawned(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            let pid = child.id() as libc::pid_t;
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
            let deadline = Instant::now() + self.config.terminate_grace;
            while Instant::now() < deadline {
                if matches!(child.try_wait(), Ok(Some(_))) {
                    return;
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

enum WaitOutcome {
    Ready(f64),
    Exited { exit_code: Option<i32> },
    TimedOut,
}

/// Background capture of a spawned server's stderr, trimmed to a tail.
struct StderrCapture {
    buffer: Arc<Mutex<String>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StderrCapture {
    fn attach(child: &mut Child) -> Self {
        let buffer = Arc::new(Mutex::new(String::new()));
        let handle = child.stderr.take().map(|stderr| {
            let sink = Arc::clone(&buffer);
            thread::spawn(move || {
                let reader = BufReader::new(stderr);
                for line in reader.lines() {
                    let Ok(line) = line else { break };
                    if let Ok(mut locked) = sink.lock() {
                        locked.push_str(&line);
                        locked.push('\n');
                        if locked.len() > STDERR_TAIL_BYTES * 2 {
                            let trimmed = tail(&locked, STDERR_TAIL_BYTES);
                            *locked = trimmed;
                        }
                    }
                }
            })
        });
        Self {
            buffer,
            handle,
        }
    }

    /// Return the captured tail, giving the reader a short window to drain
    /// the pipe. Bounded: a grandchild holding the write end open must not
    /// stall the fallback loop.
    fn finish(&mut self) -> String {
        if let Some(handle) = self.handle.take() {
            let deadline = Instant::now() + Duration::from_secs(1);
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(25));
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
        self.buffer
            .lock()
            .map(|buffer| tail(&buffer, STDERR_TAIL_BYTES))
            .unwrap_or_default()
    }
}
