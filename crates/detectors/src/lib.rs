//! Remote risk detectors: a scraped heuristic page, a trade-simulation API,
//! a polled scoring API and the block-explorer source lookup.
//!
//! Every detector returns `None` on transport errors, bad statuses or
//! unparseable bodies; callers treat that as "no data".

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokenwatch_config::{DetectorsConfig, ExplorerConfig};
use tokenwatch_core_types::{Chain, HeuristicReport, ScoringReport, SimulationReport};

mod explorer;
mod heuristic;
mod http_utils;
mod scoring;
mod simulation;

pub use explorer::{parse_source_code_response, ExplorerSourceClient};
pub use heuristic::{parse_heuristic_page, HoneypotPageDetector};
pub use scoring::{
    classify_scoring_response, ScoringGate, ScoringPermit, ScoringPoll, TokenScoringDetector,
};
pub use simulation::{parse_simulation_payload, TradeSimulationDetector};

#[async_trait]
pub trait HeuristicDetector: Send + Sync {
    async fn inspect(&self, chain: Chain, address: &str) -> Option<HeuristicReport>;
}

#[async_trait]
pub trait SimulationDetector: Send + Sync {
    async fn simulate(&self, chain: Chain, address: &str) -> Option<SimulationReport>;
}

#[async_trait]
pub trait ScoringDetector: Send + Sync {
    async fn score(&self, chain: Chain, address: &str) -> Option<ScoringReport>;

    /// Scoring polls currently holding a gate slot.
    fn pending_requests(&self) -> usize {
        0
    }
}

#[async_trait]
pub trait SourceCodeProvider: Send + Sync {
    async fn fetch_source(&self, chain: Chain, address: &str) -> Option<String>;
}

/// Production detector set wired from config.
#[derive(Clone)]
pub struct DetectorSet {
    pub heuristic: Arc<dyn HeuristicDetector>,
    pub simulation: Arc<dyn SimulationDetector>,
    pub scoring: Arc<dyn ScoringDetector>,
    pub source: Arc<dyn SourceCodeProvider>,
}

impl DetectorSet {
    pub fn from_config(detectors: &DetectorsConfig, explorer: &ExplorerConfig) -> Result<Self> {
        let detector_client = build_http_client(detectors.request_timeout_ms)
            .context("failed building detector http client")?;
        let scoring_client = build_http_client(detectors.scoring_request_timeout_ms)
            .context("failed building scoring http client")?;
        let explorer_client = build_http_client(explorer.request_timeout_ms)
            .context("failed building explorer http client")?;

        let gate = ScoringGate::new(detectors.scoring_max_concurrency);
        Ok(Self {
            heuristic: Arc::new(HoneypotPageDetector::new(
                detector_client.clone(),
                &detectors.heuristic_base_url,
            )),
            simulation: Arc::new(TradeSimulationDetector::new(
                detector_client,
                &detectors.simulation_base_url,
            )),
            scoring: Arc::new(TokenScoringDetector::new(
                scoring_client,
                &detectors.scoring_base_url,
                &detectors.scoring_api_key,
                Duration::from_secs(detectors.scoring_poll_interval_secs),
                gate,
            )),
            source: Arc::new(ExplorerSourceClient::new(
                explorer_client,
                &explorer.etherscan_api_url,
                &explorer.etherscan_api_key,
                &explorer.basescan_api_url,
                &explorer.basescan_api_key,
            )),
        })
    }
}

pub fn build_http_client(timeout_ms: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_millis(timeout_ms.max(1)))
        .build()
        .context("failed building reqwest client")
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration as StdDuration;

    #[derive(Debug, Clone)]
    pub struct ScriptedResponse {
        status: u16,
        content_type: String,
        body: String,
        extra_headers: Vec<(String, String)>,
    }

    impl ScriptedResponse {
        pub fn new(status: u16, content_type: &str, body: &str) -> Self {
            Self {
                status,
                content_type: content_type.to_string(),
                body: body.to_string(),
                extra_headers: Vec::new(),
            }
        }

        pub fn with_header(mut self, name: &str, value: &str) -> Self {
            self.extra_headers
                .push((name.to_string(), value.to_string()));
            self
        }

        fn render(&self) -> String {
            let reason = match self.status {
                200 => "OK",
                202 => "Accepted",
                400 => "Bad Request",
                404 => "Not Found",
                429 => "Too Many Requests",
                500 => "Internal Server Error",
                503 => "Service Unavailable",
                _ => "Unknown",
            };
            let mut headers = String::new();
            for (name, value) in &self.extra_headers {
                headers.push_str(&format!("{name}: {value}\r\n"));
            }
            format!(
                "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n{}",
                self.status,
                reason,
                self.content_type,
                self.body.len(),
                headers,
                self.body
            )
        }
    }

    pub struct ScriptedUpstream {
        pub base_url: String,
        handle: thread::JoinHandle<Vec<String>>,
    }

    impl ScriptedUpstream {
        /// Waits for every scripted response to be served and returns the
        /// request lines in arrival order.
        pub fn finish(self) -> Vec<String> {
            self.handle.join().expect("scripted upstream thread")
        }
    }

    /// Serves `responses` in order, one connection each.
    pub fn spawn_scripted_upstream(responses: Vec<ScriptedResponse>) -> Option<ScriptedUpstream> {
        let listener = match TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(error) => {
                eprintln!("skipping upstream HTTP test: failed to bind 127.0.0.1:0: {error}");
                return None;
            }
        };
        let addr = listener.local_addr().ok()?;
        let handle = thread::spawn(move || {
            let mut request_lines = Vec::new();
            for response in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    break;
                };
                let _ = stream.set_read_timeout(Some(StdDuration::from_secs(5)));
                let mut request_buf = [0u8; 8192];
                let bytes_read = stream.read(&mut request_buf).unwrap_or(0);
                let request_raw = String::from_utf8_lossy(&request_buf[..bytes_read]);
                request_lines.push(request_raw.lines().next().unwrap_or_default().to_string());
                let _ = stream.write_all(response.render().as_bytes());
                let _ = stream.flush();
            }
            request_lines
        });
        Some(ScriptedUpstream {
            base_url: format!("http://{addr}/upstream"),
            handle,
        })
    }
}
