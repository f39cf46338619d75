//! Small HTTP client over the local Ollama API.
//!
//! Transient failures are retried a fixed number of times with a short
//! backoff; exhaustion is logged and yields an empty result instead of an
//! error, so collaborators never have to handle listing failures.

use std::thread;
use std::time::Duration;

use serde::Deserialize;

use crate::log_warn;

const LIST_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ApiClient {
    tags_url: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

/// One entry of /api/tags. Older servers report `name`, newer ones `model`.
#[derive(Deserialize)]
struct TagEntry {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl ApiClient {
    pub fn new(api_base: &str) -> Self {
        let base = api_base.trim_end_matches('/');
        Self {
            tags_url: format!("{base}/api/tags"),
        }
    }

    /// Installed model names, or an empty list after exhausting retries.
    pub fn list_models(&self) -> Vec<String> {
        let mut last_error = String::new();
        for attempt in 0..LIST_RETRIES {
            if attempt > 0 {
                thread::sleep(RETRY_BACKOFF);
            }
            match self.fetch_models() {
                Ok(names) => return names,
                Err(err) => last_error = err,
            }
        }
        log_warn!("client", "Failed to list models via API: {}", last_error);
        Vec::new()
    }

    fn fetch_models(&self) -> Result<Vec<String>, String> {
        let response = ureq::get(&self.tags_url)
            .timeout(REQUEST_TIMEOUT)
            .call()
            .map_err(|e| format!("tags request failed: {e}"))?;

        let body = response
            .into_string()
            .map_err(|e| format!("failed to read tags response: {e}"))?;

        let parsed: TagsResponse =
            serde_json::from_str(&body).map_err(|e| format!("failed to parse tags response: {e}"))?;

        Ok(parsed
            .models
            .into_iter()
            .filter_map(|entry| entry.model.or(entry.name))
            .filter(|name| !name.is_empty())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Instant;

    fn serve_json(body: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        port
    }

    #[test]
    fn parses_model_field() {
        let port = serve_json(r#"{"models":[{"model":"llama3.2:3b"},{"model":"qwen2.5:7b"}]}"#);
        let client = ApiClient::new(&format!("http://127.0.0.1:{port}"));
        assert_eq!(client.list_models(), vec!["llama3.2:3b", "qwen2.5:7b"]);
    }

    #[test]
    fn falls_back_to_name_field() {
        let port = serve_json(r#"{"models":[{"name":"mistral:latest"}]}"#);
        let client = ApiClient::new(&format!("http://127.0.0.1:{port}"));
        assert_eq!(client.list_models(), vec!["mistral:latest"]);
    }

    #[test]
    fn empty_models_list_is_ok() {
        let port = serve_json(r#"{"models":[]}"#);
        let client = ApiClient::new(&format!("http://127.0.0.1:{port}"));
        assert!(client.list_models().is_empty());
    }

    #[test]
    fn retry_exhaustion_returns_empty_list() {
        // Reserve a port and close it so every attempt is refused.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = ApiClient::new(&format!("http://127.0.0.1:{port}"));
        let start = Instant::now();
        assert!(client.list_models().is_empty());
        // Two backoff sleeps between three refused attempts.
        assert!(start.elapsed() >= Duration::from_millis(900));
    }
}
