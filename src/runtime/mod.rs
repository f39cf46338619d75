// Runtime supervision modules for the local Ollama server

pub mod client;
pub mod command;
pub mod crash;
pub mod health;
pub mod locator;
pub mod logger;
pub mod models;
pub mod report_store;
pub mod supervisor;

// Re-export commonly used types
pub use client::ApiClient;
pub use health::{HealthChecker, DEFAULT_API_BASE};
pub use locator::{BinaryLocator, LocatorConfig, BINARY_OVERRIDE_ENV, PREFER_SYSTEM_ENV};
pub use models::*;
pub use report_store::ReportStore;
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorError, DEFAULT_STARTUP_TIMEOUT};
