//! Latest startup report, held in memory and mirrored best-effort to a JSON
//! file in a writable state directory. Persistence failures are logged and
//! otherwise ignored: diagnostics must never cause an operational failure.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::runtime::models::StartupReport;
use crate::{log_debug, log_warn};

pub const REPORT_FILE_NAME: &str = "ollama_startup_report.json";

const STATE_DIR_NAME: &str = "ollama-supervisor";

pub struct ReportStore {
    state_dir: PathBuf,
    current: Mutex<Option<StartupReport>>,
}

impl ReportStore {
    pub fn new() -> Self {
        Self::with_state_dir(resolve_state_dir())
    }

    pub fn with_state_dir(state_dir: PathBuf) -> Self {
        Self {
            state_dir,
            current: Mutex::new(None),
        }
    }

    pub fn report_path(&self) -> PathBuf {
        self.state_dir.join(REPORT_FILE_NAME)
    }

    /// Replace the current report and mirror it to disk, best effort.
    pub fn set(&self, report: StartupReport) {
        {
            let mut current = self
                .current
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *current = Some(report.clone());
        }

        match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                if let Err(err) = fs::write(self.report_path(), json) {
                    log_debug!(
                        "store",
                        "Unable to persist startup report to {}: {}",
                        self.report_path().display(),
                        err
                    );
                }
            }
            Err(err) => {
                log_warn!("store", "Unable to serialize startup report: {}", err);
            }
        }
    }

    /// Latest report: in-memory value if any, else whatever a previous
    /// process persisted, else an empty default.
    pub fn get(&self) -> StartupReport {
        {
            let current = self
                .current
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(report) = current.as_ref() {
                return report.clone();
            }
        }
        self.load_from_disk().unwrap_or_default()
    }

    pub fn load_from_disk(&self) -> Option<StartupReport> {
        let path = self.report_path();
        if !path.exists() {
            return None;
        }
        let contents = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&contents).ok()
    }
}

impl Default for ReportStore {
    fn default() -> Self {
        Self::new()
    }
}

/// First writable state directory from the platform-appropriate candidates.
fn resolve_state_dir() -> PathBuf {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(data_dir) = dirs::data_dir() {
        candidates.push(data_dir.join(STATE_DIR_NAME));
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd);
    }
    candidates.push(std::env::temp_dir().join(STATE_DIR_NAME));

    for candidate in candidates {
        if fs::create_dir_all(&candidate).is_ok() {
            return candidate;
        }
    }

    // Last resort: current directory without a mkdir attempt.
    PathBuf::from(".")
}
