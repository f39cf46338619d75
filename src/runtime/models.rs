//! Shared types for runtime supervision: binary candidates, probe results,
//! startup attempts, and the persisted startup report.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Where a discovered binary candidate came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryProvenance {
    /// Explicit override via environment variable.
    Override,
    /// Primary binary inside the bundled runtime directory.
    BundledPrimary,
    /// Compatibility fallback slot inside the bundled runtime directory.
    BundledFallback,
    /// Resolved from the PATH environment variable.
    PathResolved,
    /// One of the fixed well-known system install locations.
    SystemPath,
}

/// A discovered, executable path that might host the Ollama server.
#[derive(Clone, Debug)]
pub struct BinaryCandidate {
    pub path: PathBuf,
    pub provenance: BinaryProvenance,
}

impl BinaryCandidate {
    pub fn display_path(&self) -> String {
        self.path.display().to_string()
    }
}

/// Result of the short `--version` probe run against one candidate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProbeResult {
    pub binary: String,
    pub ok: bool,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub duration_s: f64,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr_tail: String,
    #[serde(default)]
    pub accel_crash: bool,
}

/// How one candidate's full trial ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Probe failed; the server was never spawned.
    SkippedProbeFailed,
    /// Server spawned and accepted (healthy, or fire-and-forget with `wait=false`).
    SpawnedReady,
    /// Server spawned but never became healthy; it was actively terminated.
    SpawnedTimeout,
    /// Server spawned and exited before becoming healthy.
    SpawnedCrashed,
}

/// One candidate's full trial during an ensure-running call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartupAttempt {
    pub binary: String,
    pub probe: ProbeResult,
    #[serde(default)]
    pub pid: Option<u32>,
    pub outcome: AttemptOutcome,
    /// Exit code of the spawned server when it crashed before readiness.
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Captured stderr tail of the spawned server, when it crashed.
    #[serde(default)]
    pub stderr_tail: Option<String>,
    /// Whether the spawned server's stderr matched a known accel-layer crash.
    #[serde(default)]
    pub accel_crash: Option<bool>,
    /// Seconds until the server answered health checks, on success.
    #[serde(default)]
    pub ready_after_s: Option<f64>,
}

impl StartupAttempt {
    /// Attempt skipped because the probe failed.
    pub fn skipped(candidate: &BinaryCandidate, probe: ProbeResult) -> Self {
        Self {
            binary: candidate.display_path(),
            probe,
            pid: None,
            outcome: AttemptOutcome::SkippedProbeFailed,
            exit_code: None,
            stderr_tail: None,
            accel_crash: None,
            ready_after_s: None,
        }
    }
}

/// Reason code attached to a failed startup report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No viable binary candidate was discovered.
    BinaryNotFound,
    /// All candidates were tried and none reached healthy state.
    StartupFailed,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BinaryNotFound => write!(f, "binary_not_found"),
            Self::StartupFailed => write!(f, "startup_failed"),
        }
    }
}

/// Structured record of one ensure-running call. Immutable once produced;
/// each call replaces the previous report wholesale.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StartupReport {
    pub success: bool,
    #[serde(default)]
    pub already_running: bool,
    #[serde(default)]
    pub waited: bool,
    #[serde(default)]
    pub selected_binary: Option<String>,
    #[serde(default)]
    pub attempts: Vec<StartupAttempt>,
    #[serde(default)]
    pub ready_after_s: Option<f64>,
    #[serde(default)]
    pub error: Option<FailureReason>,
    #[serde(default)]
    pub timestamp: u64,
}

impl StartupReport {
    /// The server was reachable before anything had to be spawned.
    pub fn already_running() -> Self {
        Self {
            success: true,
            already_running: true,
            timestamp: unix_now(),
            ..Self::default()
        }
    }

    /// A candidate was spawned and accepted.
    pub fn spawned(
        selected: String,
        waited: bool,
        ready_after_s: Option<f64>,
        attempts: Vec<StartupAttempt>,
    ) -> Self {
        Self {
            success: true,
            waited,
            selected_binary: Some(selected),
            ready_after_s,
            attempts,
            timestamp: unix_now(),
            ..Self::default()
        }
    }

    /// The call failed with the given reason code.
    pub fn failed(reason: FailureReason, attempts: Vec<StartupAttempt>) -> Self {
        Self {
            success: false,
            error: Some(reason),
            attempts,
            timestamp: unix_now(),
            ..Self::default()
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Round a duration to millisecond precision for report fields.
pub(crate) fn round_secs(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_codes_are_stable() {
        assert_eq!(FailureReason::BinaryNotFound.to_string(), "binary_not_found");
        assert_eq!(FailureReason::StartupFailed.to_string(), "startup_failed");

        let json = serde_json::to_string(&FailureReason::StartupFailed).unwrap();
        assert_eq!(json, "\"startup_failed\"");
    }

    #[test]
    fn report_roundtrips_through_json() {
        let report = StartupReport::spawned(
            "/usr/local/bin/ollama".to_string(),
            true,
            Some(1.25),
            vec![],
        );
        let json = serde_json::to_string(&report).unwrap();
        let back: StartupReport = serde_json::from_str(&json).unwrap();
        assert!(back.success);
        assert!(back.waited);
        assert_eq!(back.selected_binary.as_deref(), Some("/usr/local/bin/ollama"));
        assert_eq!(back.ready_after_s, Some(1.25));
    }

    #[test]
    fn default_report_is_empty() {
        let report = StartupReport::default();
        assert!(!report.success);
        assert!(report.attempts.is_empty());
        assert!(report.error.is_none());
    }

    #[test]
    fn round_secs_keeps_millisecond_precision() {
        assert_eq!(round_secs(1.23456), 1.235);
        assert_eq!(round_secs(0.0004), 0.0);
    }
}
