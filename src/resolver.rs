//! Backend base-URL resolution for clients.
//!
//! Candidates are tried in order against `GET {base}/api/test`; the first one
//! answering 2xx wins and is cached for the life of the resolver. When every
//! check fails the first candidate is used anyway, so the caller gets a real
//! connection error later instead of a silent hang.

use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_CANDIDATES: [&str; 2] = ["http://localhost:5001", "http://localhost:5000"];
const PING_TIMEOUT: Duration = Duration::from_secs(3);

pub struct BackendResolver {
  candidates: Vec<String>,
  http: reqwest::Client,
  resolved: OnceCell<String>,
}

impl BackendResolver {
  /// Empty or blank candidates are dropped; an empty list falls back to the defaults.
  pub fn new(candidates: Vec<String>) -> Self {
    let mut candidates: Vec<String> = candidates
      .into_iter()
      .map(|c| c.trim().trim_end_matches('/').to_string())
      .filter(|c| !c.is_empty())
      .collect();
    if candidates.is_empty() {
      candidates = DEFAULT_CANDIDATES.iter().map(|s| s.to_string()).collect();
    }
    let http = reqwest::Client::builder()
      .timeout(PING_TIMEOUT)
      .build()
      .unwrap_or_else(|_| reqwest::Client::new());
    Self { candidates, http, resolved: OnceCell::new() }
  }

  pub fn candidates(&self) -> &[String] { &self.candidates }

  /// The live base URL. Checks run at most once; concurrent callers share the result.
  pub async fn resolve(&self) -> &str {
    self.resolved.get_or_init(|| self.ping_all()).await
  }

  #[instrument(level = "info", target = "edutest", skip(self), fields(candidates = self.candidates.len()))]
  async fn ping_all(&self) -> String {
    for base in &self.candidates {
      if self.ping(base).await {
        info!(target: "edutest", %base, "Backend resolved");
        return base.clone();
      }
    }
    let fallback = self.candidates.first().cloned().unwrap_or_default();
    warn!(target: "edutest", %fallback, "No backend answered the liveness check; using the first candidate");
    fallback
  }

  async fn ping(&self, base: &str) -> bool {
    let url = format!("{}/api/test", base);
    match self.http.get(&url).send().await {
      Ok(res) if res.status().is_success() => true,
      Ok(res) => {
        debug!(target: "edutest", %url, status = res.status().as_u16(), "Liveness check rejected");
        false
      }
      Err(e) => {
        debug!(target: "edutest", %url, error = %e, "Liveness check failed");
        false
      }
    }
  }
}
