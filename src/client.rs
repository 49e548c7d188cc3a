//! HTTP client for the backend API, used by the terminal client.
//!
//! Question sets come back as JSON text and go through the same parser the
//! server uses, so a misbehaving backend is held to the same shape rules.
//! `ApiClient` also implements `TextGenerator` on top of `POST /api/explain`,
//! which lets the explanation helpers run unchanged on the client side.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::domain::QuestionSet;
use crate::error::{GenerationError, UpstreamError};
use crate::gemini::{GenerateFuture, TextGenerator};
use crate::parser::parse_question_set;
use crate::protocol::{ErrorOut, ExplainIn, ExplainOut};
use crate::questions::QuestionRequest;

/// Generation can take a while; keep this above the server's upstream timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum ClientError {
  #[error("could not reach the backend: {0}")]
  Transport(String),
  #[error("backend returned HTTP {status}: {message}")]
  Backend { status: u16, message: String, kind: Option<String> },
  #[error(transparent)]
  Generation(#[from] GenerationError),
}

impl ClientError {
  /// Worth offering "Try again".
  pub fn is_retryable(&self) -> bool {
    match self {
      ClientError::Transport(_) => true,
      ClientError::Backend { status, kind, .. } => {
        *status >= 502 || matches!(kind.as_deref(), Some("upstream_unavailable" | "empty_upstream_response"))
      }
      ClientError::Generation(e) => e.is_retryable(),
    }
  }
}

pub struct ApiClient {
  base_url: String,
  http: reqwest::Client,
}

impl ApiClient {
  pub fn new(base_url: &str) -> Self {
    let http = reqwest::Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .build()
      .unwrap_or_else(|_| reqwest::Client::new());
    Self { base_url: base_url.trim_end_matches('/').to_string(), http }
  }

  pub fn base_url(&self) -> &str { &self.base_url }

  #[instrument(level = "info", skip(self), fields(base = %self.base_url))]
  pub async fn fetch_questions(&self, req: &QuestionRequest) -> Result<QuestionSet, ClientError> {
    let res = self
      .http
      .post(format!("{}/api/questions", self.base_url))
      .json(req)
      .send()
      .await
      .map_err(|e| ClientError::Transport(e.to_string()))?;

    let status = res.status();
    let body = res.text().await.map_err(|e| ClientError::Transport(e.to_string()))?;
    if !status.is_success() {
      return Err(backend_error(status.as_u16(), &body));
    }

    let set = parse_question_set(&body).map_err(GenerationError::from)?;
    info!(target: "questions", count = set.len(), "Questions received from backend");
    Ok(set)
  }

  #[instrument(level = "info", skip(self, prompt), fields(prompt_len = prompt.len()))]
  pub async fn explain(&self, prompt: &str) -> Result<String, UpstreamError> {
    let res = self
      .http
      .post(format!("{}/api/explain", self.base_url))
      .json(&ExplainIn { prompt: prompt.to_string() })
      .send()
      .await
      .map_err(|e| if e.is_timeout() { UpstreamError::Timeout(REQUEST_TIMEOUT) } else { UpstreamError::Transport(e.to_string()) })?;

    let status = res.status();
    let body = res.text().await.map_err(|e| UpstreamError::Transport(e.to_string()))?;
    if status.is_success() {
      let out: ExplainOut = serde_json::from_str(&body).map_err(|e| UpstreamError::Transport(e.to_string()))?;
      return if out.explanation.trim().is_empty() { Err(UpstreamError::NoText) } else { Ok(out.explanation) };
    }

    match serde_json::from_str::<ErrorOut>(&body) {
      Ok(err) if err.error == "No explanation returned" => Err(UpstreamError::NoText),
      Ok(err) => {
        warn!(target: "explain", status = status.as_u16(), error = %err.error, "Backend explanation failed");
        Err(UpstreamError::Http { status: status.as_u16(), message: err.details.unwrap_or(err.error) })
      }
      Err(_) => Err(UpstreamError::Http { status: status.as_u16(), message: body }),
    }
  }
}

impl TextGenerator for ApiClient {
  fn generate<'a>(&'a self, prompt: &'a str) -> GenerateFuture<'a> {
    Box::pin(self.explain(prompt))
  }
}

fn backend_error(status: u16, body: &str) -> ClientError {
  match serde_json::from_str::<ErrorOut>(body) {
    Ok(err) => ClientError::Backend {
      status,
      message: err.message.unwrap_or(err.error),
      kind: err.kind,
    },
    Err(_) => ClientError::Backend { status, message: body.to_string(), kind: None },
  }
}
