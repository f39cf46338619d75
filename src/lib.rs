//! Supervision of a locally-running Ollama model server.
//!
//! Application code asks a [`Supervisor`] to make sure "a model server is
//! reachable" without caring how it was installed, started, or whether it
//! previously crashed. The supervisor discovers binary candidates, probes
//! them, spawns `ollama serve` detached, polls health with bounded timeouts,
//! falls back across candidates, and records a structured startup report for
//! diagnostics.
//!
//! Construct one [`Supervisor`] per process and share it by reference;
//! concurrent `ensure_running` calls are serialized by a process-local lock.

pub mod runtime;

pub use runtime::{
    AttemptOutcome, BinaryCandidate, BinaryProvenance, FailureReason, ProbeResult,
    StartupAttempt, StartupReport, Supervisor, SupervisorConfig, SupervisorError,
    DEFAULT_STARTUP_TIMEOUT,
};
