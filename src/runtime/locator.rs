//! Discovery and ordering of Ollama binary candidates.
//!
//! Candidates come from an explicit override, the bundled runtime directory,
//! the PATH, and a fixed list of well-known install locations. Discovery
//! never fails; an empty list is a normal, reportable condition.

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use crate::log_warn;
use crate::runtime::models::{BinaryCandidate, BinaryProvenance};

/// Environment variable holding an explicit binary override path.
pub const BINARY_OVERRIDE_ENV: &str = "OLLAMA_SUPERVISOR_BINARY";
/// Environment variable toggling system-before-bundled ordering.
pub const PREFER_SYSTEM_ENV: &str = "OLLAMA_SUPERVISOR_PREFER_SYSTEM";

/// Loopback bind forced onto spawned servers for predictability.
pub const DEFAULT_BIND: &str = "127.0.0.1:11434";

const BINARY_NAME: &str = "ollama";
const FALLBACK_BINARY_NAME: &str = "ollama-fallback";

const WELL_KNOWN_PATHS: &[&str] = &[
    "/opt/homebrew/bin/ollama",
    "/usr/local/bin/ollama",
    "/usr/bin/ollama",
];

/// Discovery configuration, captured once so tests can inject paths without
/// touching the process environment.
#[derive(Clone, Debug)]
pub struct LocatorConfig {
    pub override_binary: Option<PathBuf>,
    pub bundled_dir: Option<PathBuf>,
    pub search_path: bool,
    pub well_known: Vec<PathBuf>,
    pub prefer_system: bool,
}

impl LocatorConfig {
    pub fn from_env() -> Self {
        Self {
            override_binary: env::var_os(BINARY_OVERRIDE_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            bundled_dir: default_bundled_dir(),
            search_path: true,
            well_known: WELL_KNOWN_PATHS.iter().map(PathBuf::from).collect(),
            prefer_system: env::var(PREFER_SYSTEM_ENV)
                .map(|v| parse_bool_flag(&v))
                .unwrap_or(true),
        }
    }
}

/// Parse the prefer-system toggle the same way the rest of the env surface
/// does: 1/true/yes/on enable, anything else disables.
pub(crate) fn parse_bool_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Bundled runtime directory: `ollama/` next to the current executable when
/// shipped, else a `bin/` directory under the working directory in
/// development layouts.
fn default_bundled_dir() -> Option<PathBuf> {
    if let Ok(exe) = env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let bundled = exe_dir.join(BINARY_NAME);
            if bundled.is_dir() {
                return Some(bundled);
            }
        }
    }

    let dev_dir = env::current_dir().ok()?.join("bin");
    if dev_dir.join(BINARY_NAME).exists() {
        return Some(dev_dir);
    }
    None
}

pub struct BinaryLocator {
    config: LocatorConfig,
}

impl BinaryLocator {
    pub fn new(config: LocatorConfig) -> Self {
        Self { config }
    }

    /// Ordered, deduplicated candidate list. Every returned entry exists and
    /// is executable at call time.
    ///
    /// `preferred` is the previously-successful binary (supervisor cache or
    /// persisted report); when present in the list it moves to the front.
    pub fn candidates(&self, preferred: Option<&Path>) -> Vec<BinaryCandidate> {
        if let Some(override_path) = &self.config.override_binary {
            // The override short-circuits assembly, preference, and the
            // preferred-binary reordering.
            if is_executable(override_path) {
                return vec![BinaryCandidate {
                    path: override_path.clone(),
                    provenance: BinaryProvenance::Override,
                }];
            }
            log_warn!(
                "locator",
                "Configured override {} is not an executable file",
                override_path.display()
            );
            return Vec::new();
        }

        let mut raw: Vec<(PathBuf, BinaryProvenance)> = Vec::new();
        if let Some(dir) = &self.config.bundled_dir {
            raw.push((dir.join(BINARY_NAME), BinaryProvenance::BundledPrimary));
            raw.push((
                dir.join(FALLBACK_BINARY_NAME),
                BinaryProvenance::BundledFallback,
            ));
        }
        if self.config.search_path {
            if let Some(path) = resolve_from_path() {
                raw.push((path, BinaryProvenance::PathResolved));
            }
        }
        for path in &self.config.well_known {
            raw.push((path.clone(), BinaryProvenance::SystemPath));
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut deduped: Vec<BinaryCandidate> = Vec::new();
        for (path, provenance) in raw {
            if !is_executable(&path) {
                continue;
            }
            if seen.insert(canonical_key(&path)) {
                deduped.push(BinaryCandidate { path, provenance });
            }
        }

        if self.config.prefer_system {
            let (system, bundled): (Vec<_>, Vec<_>) = deduped
                .into_iter()
                .partition(|c| !self.is_bundled_path(&c.path));
            deduped = system;
            deduped.extend(bundled);
        }

        if let Some(preferred) = preferred {
            let key = canonical_key(preferred);
            if let Some(pos) = deduped.iter().position(|c| canonical_key(&c.path) == key) {
                let front = deduped.remove(pos);
                deduped.insert(0, front);
            }
        }

        deduped
    }

    /// Whether `path` lives under the bundled runtime directory.
    pub fn is_bundled_path(&self, path: &Path) -> bool {
        let Some(dir) = &self.config.bundled_dir else {
            return false;
        };
        let canonical_dir = dir.canonicalize().unwrap_or_else(|_| dir.clone());
        let canonical_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        canonical_path.starts_with(&canonical_dir)
    }

    /// Environment additions for running `binary`: dynamic-library search
    /// path when it is the bundled build, plus a loopback bind when the
    /// caller has not set one.
    pub fn runtime_env(&self, binary: &Path) -> Vec<(String, String)> {
        let mut extra: Vec<(String, String)> = Vec::new();

        #[cfg(unix)]
        if self.is_bundled_path(binary) {
            if let Some(dir) = &self.config.bundled_dir {
                let dir_str = dir.display().to_string();
                let var = if cfg!(target_os = "macos") {
                    "DYLD_LIBRARY_PATH"
                } else {
                    "LD_LIBRARY_PATH"
                };
                let value = match env::var(var) {
                    Ok(existing) if !existing.is_empty() => format!("{dir_str}:{existing}"),
                    _ => dir_str.clone(),
                };
                extra.push((var.to_string(), value));

                if cfg!(target_os = "macos") {
                    extra.push((
                        "MLX_METAL_PATH".to_string(),
                        dir.join("mlx.metallib").display().to_string(),
                    ));
                }
            }
        }

        if env::var_os("OLLAMA_HOST").is_none() {
            extra.push(("OLLAMA_HOST".to_string(), DEFAULT_BIND.to_string()));
        }

        extra
    }
}

/// Canonical string used for deduplication and preferred-binary matching.
fn canonical_key(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

fn resolve_from_path() -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join(BINARY_NAME);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match path.metadata() {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn test_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ollama_supervisor_locator_{label}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn make_executable(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config(bundled: Option<PathBuf>, well_known: Vec<PathBuf>) -> LocatorConfig {
        LocatorConfig {
            override_binary: None,
            bundled_dir: bundled,
            search_path: false,
            well_known,
            prefer_system: true,
        }
    }

    #[test]
    fn override_returns_singleton() {
        let dir = test_dir("override");
        let override_bin = make_executable(&dir, "custom-ollama");
        let bundled_dir = dir.join("bundled");
        fs::create_dir_all(&bundled_dir).unwrap();
        make_executable(&bundled_dir, "ollama");

        let mut cfg = config(Some(bundled_dir), vec![]);
        cfg.override_binary = Some(override_bin.clone());
        let locator = BinaryLocator::new(cfg);

        let candidates = locator.candidates(None);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].path, override_bin);
        assert_eq!(candidates[0].provenance, BinaryProvenance::Override);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn dangling_override_yields_empty_list() {
        let dir = test_dir("dangling");
        let bundled_dir = dir.join("bundled");
        fs::create_dir_all(&bundled_dir).unwrap();
        make_executable(&bundled_dir, "ollama");

        let mut cfg = config(Some(bundled_dir), vec![]);
        cfg.override_binary = Some(dir.join("missing-binary"));
        let locator = BinaryLocator::new(cfg);

        assert!(locator.candidates(None).is_empty());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn drops_missing_and_non_executable_entries() {
        let dir = test_dir("filter");
        let plain = dir.join("ollama-data");
        fs::write(&plain, "not a binary").unwrap();
        fs::set_permissions(&plain, fs::Permissions::from_mode(0o644)).unwrap();

        let locator = BinaryLocator::new(config(
            None,
            vec![plain, dir.join("does-not-exist")],
        ));
        assert!(locator.candidates(None).is_empty());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn deduplicates_by_canonical_path() {
        let dir = test_dir("dedup");
        let bundled_dir = dir.join("bundled");
        fs::create_dir_all(&bundled_dir).unwrap();
        let bundled_bin = make_executable(&bundled_dir, "ollama");

        // The same binary is also listed as a well-known path.
        let locator = BinaryLocator::new(config(
            Some(bundled_dir),
            vec![bundled_bin.clone()],
        ));
        let candidates = locator.candidates(None);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].path, bundled_bin);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn prefer_system_orders_system_before_bundled() {
        let dir = test_dir("prefer");
        let bundled_dir = dir.join("bundled");
        let system_dir = dir.join("system");
        fs::create_dir_all(&bundled_dir).unwrap();
        fs::create_dir_all(&system_dir).unwrap();
        let bundled_bin = make_executable(&bundled_dir, "ollama");
        let system_bin = make_executable(&system_dir, "ollama");

        let mut cfg = config(Some(bundled_dir), vec![system_bin.clone()]);
        let locator = BinaryLocator::new(cfg.clone());
        let candidates = locator.candidates(None);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].path, system_bin);
        assert_eq!(candidates[1].path, bundled_bin);

        cfg.prefer_system = false;
        let locator = BinaryLocator::new(cfg);
        let candidates = locator.candidates(None);
        assert_eq!(candidates[0].path, bundled_bin);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn preferred_binary_moves_to_front() {
        let dir = test_dir("preferred");
        let bundled_dir = dir.join("bundled");
        let system_dir = dir.join("system");
        fs::create_dir_all(&bundled_dir).unwrap();
        fs::create_dir_all(&system_dir).unwrap();
        let bundled_bin = make_executable(&bundled_dir, "ollama");
        let system_bin = make_executable(&system_dir, "ollama");

        let locator = BinaryLocator::new(config(
            Some(bundled_dir),
            vec![system_bin.clone()],
        ));

        // Prefer-system would put the system binary first, but a remembered
        // bundled binary wins.
        let candidates = locator.candidates(Some(&bundled_bin));
        assert_eq!(candidates[0].path, bundled_bin);
        assert_eq!(candidates[1].path, system_bin);

        // A preferred path that is not in the list changes nothing.
        let candidates = locator.candidates(Some(&dir.join("elsewhere")));
        assert_eq!(candidates[0].path, system_bin);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn no_duplicate_canonical_paths_in_any_listing() {
        let dir = test_dir("invariant");
        let bundled_dir = dir.join("bundled");
        fs::create_dir_all(&bundled_dir).unwrap();
        let bundled_bin = make_executable(&bundled_dir, "ollama");
        make_executable(&bundled_dir, "ollama-fallback");

        let locator = BinaryLocator::new(config(
            Some(bundled_dir),
            vec![bundled_bin, dir.join("missing")],
        ));
        let candidates = locator.candidates(None);
        let mut keys: Vec<String> = candidates
            .iter()
            .map(|c| canonical_key(&c.path))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), candidates.len());
        for candidate in &candidates {
            assert!(is_executable(&candidate.path));
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn bool_flag_parsing() {
        assert!(parse_bool_flag("1"));
        assert!(parse_bool_flag("true"));
        assert!(parse_bool_flag("Yes"));
        assert!(parse_bool_flag(" on "));
        assert!(!parse_bool_flag("0"));
        assert!(!parse_bool_flag("false"));
        assert!(!parse_bool_flag(""));
    }

    #[test]
    fn runtime_env_sets_library_path_for_bundled_binary() {
        let dir = test_dir("env");
        let bundled_dir = dir.join("bundled");
        fs::create_dir_all(&bundled_dir).unwrap();
        let bundled_bin = make_executable(&bundled_dir, "ollama");
        let system_dir = dir.join("system");
        fs::create_dir_all(&system_dir).unwrap();
        let system_bin = make_executable(&system_dir, "ollama");

        let locator = BinaryLocator::new(config(Some(bundled_dir.clone()), vec![]));

        let env = locator.runtime_env(&bundled_bin);
        let lib_var = if cfg!(target_os = "macos") {
            "DYLD_LIBRARY_PATH"
        } else {
            "LD_LIBRARY_PATH"
        };
        assert!(env.iter().any(|(k, v)| k == lib_var
            && v.contains(&bundled_dir.display().to_string())));

        let env = locator.runtime_env(&system_bin);
        assert!(!env.iter().any(|(k, _)| k == lib_var));

        let _ = fs::remove_dir_all(&dir);
    }
}
