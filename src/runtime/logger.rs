use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Append-only file logger shared by the runtime modules.
///
/// If the log file cannot be opened (read-only working directory, sandbox),
/// logging is silently disabled rather than failing the caller.
pub struct Logger {
    file: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(log_path: &str) -> Self {
        Logger {
            file: Self::open(log_path),
        }
    }

    fn open(log_path: &str) -> Option<Mutex<File>> {
        if let Some(parent) = Path::new(log_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok()?;
            }
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .ok()
            .map(Mutex::new)
    }

    pub fn log(&self, level: &str, category: &str, message: &str) {
        let Some(ref file) = self.file else {
            return;
        };

        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let log_line = format!("[{}] [{}] [{}] {}\n", timestamp, level, category, message);

        if let Ok(mut file) = file.lock() {
            let _ = file.write_all(log_line.as_bytes());
            let _ = file.flush();
        }
    }

    pub fn debug(&self, category: &str, message: &str) {
        self.log("DEBUG", category, message);
    }

    pub fn info(&self, category: &str, message: &str) {
        self.log("INFO", category, message);
    }

    pub fn warn(&self, category: &str, message: &str) {
        self.log("WARN", category, message);
    }

    pub fn error(&self, category: &str, message: &str) {
        self.log("ERROR", category, message);
    }
}

// Global logger instance
lazy_static::lazy_static! {
    pub static ref LOGGER: Logger = Logger::new("logs/ollama_supervisor.log");
}

// Convenience macros
#[macro_export]
macro_rules! log_debug {
    ($category:expr, $($arg:tt)*) => {
        $crate::runtime::logger::LOGGER.debug($category, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_info {
    ($category:expr, $($arg:tt)*) => {
        $crate::runtime::logger::LOGGER.info($category, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($category:expr, $($arg:tt)*) => {
        $crate::runtime::logger::LOGGER.warn($category, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_error {
    ($category:expr, $($arg:tt)*) => {
        $crate::runtime::logger::LOGGER.error($category, &format!($($arg)*));
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logger_writes_to_file() {
        let path = std::env::temp_dir().join(format!(
            "ollama_supervisor_logger_test_{}.log",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let logger = Logger::new(&path.display().to_string());
        logger.info("test", "hello from the logger test");
        logger.warn("test", "a warning line");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[INFO] [test] hello from the logger test"));
        assert!(contents.contains("[WARN] [test] a warning line"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unopenable_log_path_disables_logging() {
        // A path under a file cannot be created; logging must not panic.
        let base = std::env::temp_dir().join(format!(
            "ollama_supervisor_logger_block_{}",
            std::process::id()
        ));
        std::fs::write(&base, b"plain file").unwrap();

        let logger = Logger::new(&base.join("nested").join("x.log").display().to_string());
        logger.info("test", "goes nowhere");

        let _ = std::fs::remove_file(&base);
    }
}
