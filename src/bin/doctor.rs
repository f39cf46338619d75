//! Startup diagnostics utility: runs ensure-running against the local Ollama
//! server and prints the resulting report.

use std::process;
use std::time::Duration;

use ollama_supervisor::{Supervisor, SupervisorError, DEFAULT_STARTUP_TIMEOUT};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let help = args.iter().any(|a| a == "--help" || a == "-h");
    let no_wait = args.iter().any(|a| a == "--no-wait");
    let show_models = args.iter().any(|a| a == "--models" || a == "-m");

    // Parse --timeout <seconds>
    let timeout = args
        .windows(2)
        .find(|w| w[0] == "--timeout" || w[0] == "-t")
        .and_then(|w| w[1].parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_STARTUP_TIMEOUT);

    if help {
        println!("ollama_doctor: Check and start the local Ollama server");
        println!();
        println!("Usage: ollama_doctor [OPTIONS]");
        println!();
        println!("Options:");
        println!("  -t, --timeout <SECS>  Per-candidate startup timeout (default: 30)");
        println!("      --no-wait         Spawn without waiting for readiness");
        println!("  -m, --models          List installed models once the server is up");
        println!("  -h, --help            Show this help");
        return;
    }

    let supervisor = Supervisor::new();

    if supervisor.is_running() {
        println!("Ollama server is already running");
    }

    let ready = match supervisor.ensure_running(!no_wait, timeout) {
        Ok(ready) => ready,
        Err(SupervisorError::LockTimeout(waited)) => {
            eprintln!(
                "Startup lock still held after {waited:?} - another caller is starting the server"
            );
            process::exit(2);
        }
    };

    let report = supervisor.last_report();
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Unable to render startup report: {e}"),
    }

    if !ready {
        eprintln!("Ollama server is not available");
        process::exit(1);
    }

    if show_models {
        let models = supervisor.list_models();
        if models.is_empty() {
            println!("No models installed");
        } else {
            println!("Installed models:");
            for model in models {
                println!("  {model}");
            }
        }
    }
}
