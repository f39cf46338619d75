//! Reachability probes against the local Ollama HTTP API.

use std::time::Duration;

/// Default API base for the loopback server.
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:11434";

/// Per-endpoint probe timeout. Short on purpose: callers poll.
const PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

pub struct HealthChecker {
    version_url: String,
    tags_url: String,
}

impl HealthChecker {
    pub fn new(api_base: &str) -> Self {
        let base = api_base.trim_end_matches('/');
        Self {
            version_url: format!("{base}/api/version"),
            tags_url: format!("{base}/api/tags"),
        }
    }

    /// Whether the server answers on its local API.
    ///
    /// The version endpoint is typically reachable sooner than /api/tags
    /// during cold start, so it is tried first. Network and timeout errors
    /// are swallowed and read as "not running".
    pub fn is_running(&self) -> bool {
        if http_get_ok(&self.version_url, PROBE_TIMEOUT) {
            return true;
        }
        http_get_ok(&self.tags_url, PROBE_TIMEOUT)
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

fn http_get_ok(url: &str, timeout: Duration) -> bool {
    // ureq reports non-2xx statuses as errors, so Ok means reachable.
    ureq::get(url).timeout(timeout).call().is_ok()
}
