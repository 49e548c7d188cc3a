//! Minimal client for the upstream text generator (Gemini `generateContent`).
//!
//! One prompt in, one text out. Calls are instrumented and log the model,
//! latency and response size (not contents).
//!
//! NOTE: the API key travels in the `x-goog-api-key` header, never in the URL,
//! so it cannot leak through request logs.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::config::ServerConfig;
use crate::error::UpstreamError;

pub type GenerateFuture<'a> = Pin<Box<dyn Future<Output = Result<String, UpstreamError>> + Send + 'a>>;

/// Anything that turns a prompt into free text. Implemented by `Gemini` on the
/// server and by the HTTP `ApiClient` on the terminal client.
pub trait TextGenerator: Send + Sync {
  fn generate<'a>(&'a self, prompt: &'a str) -> GenerateFuture<'a>;
}

#[derive(Clone)]
pub struct Gemini {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub timeout: Duration,
}

impl Gemini {
  /// Construct the client if the config carries an API key; otherwise return None.
  pub fn from_config(cfg: &ServerConfig) -> Option<Self> {
    let api_key = cfg.api_key.clone()?;
    let client = reqwest::Client::builder()
      .timeout(cfg.upstream_timeout)
      .build()
      .map_err(|e| error!(target: "edutest", error = %e, "Failed to build HTTP client"))
      .ok()?;

    Some(Self {
      client,
      api_key,
      base_url: cfg.base_url.clone(),
      model: cfg.model.clone(),
      timeout: cfg.upstream_timeout,
    })
  }

  fn endpoint(&self) -> String {
    format!("{}/models/{}:generateContent", self.base_url, self.model)
  }

  /// Single-shot completion. An empty or whitespace-only answer is `NoText`.
  #[instrument(level = "info", skip(self, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
  pub async fn generate_text(&self, prompt: &str) -> Result<String, UpstreamError> {
    let req = GenerateRequest {
      contents: vec![Content { parts: vec![Part { text: prompt.to_string() }] }],
    };
    let start = Instant::now();

    let res = self.client.post(self.endpoint())
      .header(USER_AGENT, "edutest-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header("x-goog-api-key", &self.api_key)
      .json(&req).send().await.map_err(|e| self.classify(e))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_upstream_error(&body).unwrap_or(body);
      error!(status = status.as_u16(), elapsed = ?start.elapsed(), "Upstream returned an error status");
      return Err(UpstreamError::Http { status: status.as_u16(), message });
    }

    let body: GenerateResponse = res.json().await.map_err(|e| self.classify(e))?;
    if let Some(usage) = &body.usage_metadata {
      info!(prompt_tokens = ?usage.prompt_token_count, output_tokens = ?usage.candidates_token_count, total_tokens = ?usage.total_token_count, "Upstream usage");
    }

    let text = body.first_text().ok_or(UpstreamError::NoText)?;
    info!(elapsed = ?start.elapsed(), response_len = text.len(), "Upstream response received");
    Ok(text)
  }

  fn classify(&self, e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
      UpstreamError::Timeout(self.timeout)
    } else {
      UpstreamError::Transport(e.to_string())
    }
  }
}

impl TextGenerator for Gemini {
  fn generate<'a>(&'a self, prompt: &'a str) -> GenerateFuture<'a> {
    Box::pin(self.generate_text(prompt))
  }
}

// --- generateContent DTOs ---

#[derive(Serialize)]
struct GenerateRequest { contents: Vec<Content> }
#[derive(Serialize, Deserialize)]
struct Content { #[serde(default)] parts: Vec<Part> }
#[derive(Serialize, Deserialize)]
struct Part { #[serde(default)] text: String }

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
  #[serde(default)] candidates: Vec<Candidate>,
  #[serde(default)] usage_metadata: Option<UsageMetadata>,
}
#[derive(Deserialize)]
struct Candidate { #[serde(default)] content: Option<Content> }
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
  #[serde(default)] prompt_token_count: Option<u32>,
  #[serde(default)] candidates_token_count: Option<u32>,
  #[serde(default)] total_token_count: Option<u32>,
}

impl GenerateResponse {
  /// Text of the first part of the first candidate, if it has any content.
  fn first_text(self) -> Option<String> {
    self.candidates
      .into_iter()
      .next()
      .and_then(|c| c.content)
      .and_then(|c| c.parts.into_iter().next())
      .map(|p| p.text)
      .filter(|t| !t.trim().is_empty())
  }
}

/// Try to extract a clean error message from an upstream error body.
fn extract_upstream_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}


#[cfg(test)]
mod tests {
  use super::*;
  use axum::{http::StatusCode, routing::post, Json, Router};
  use serde_json::{json, Value};

  async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
      let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
  }

  fn client_for(base_url: String) -> Gemini {
    let cfg = ServerConfig {
      api_key: Some("test-key".into()),
      base_url,
      upstream_timeout: Duration::from_secs(5),
      ..ServerConfig::default()
    };
    Gemini::from_config(&cfg).expect("client")
  }

  #[test]
  fn missing_key_disables_client() {
    assert!(Gemini::from_config(&ServerConfig::default()).is_none());
  }

  #[test]
  fn first_text_skips_blank_candidates() {
    let body: GenerateResponse =
      serde_json::from_value(json!({"candidates": [{"content": {"parts": [{"text": "  "}]}}]})).expect("dto");
    assert_eq!(body.first_text(), None);
    let body: GenerateResponse = serde_json::from_value(json!({"candidates": []})).expect("dto");
    assert_eq!(body.first_text(), None);
    let body: GenerateResponse =
      serde_json::from_value(json!({"candidates": [{"content": {"parts": [{"text": "[1]"}]}}]})).expect("dto");
    assert_eq!(body.first_text().as_deref(), Some("[1]"));
  }

  #[test]
  fn error_body_message_is_extracted() {
    let body = r#"{"error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}}"#;
    assert_eq!(extract_upstream_error(body).as_deref(), Some("API key not valid"));
    assert_eq!(extract_upstream_error("gateway exploded"), None);
  }

  #[tokio::test]
  async fn generate_text_reads_first_candidate() {
    let app = Router::new().route(
      "/models/:model",
      post(|Json(body): Json<Value>| async move {
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or_default().to_string();
        Json(json!({
          "candidates": [{"content": {"parts": [{"text": format!("echo: {prompt}")}]}}],
          "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 4, "totalTokenCount": 7}
        }))
      }),
    );
    let gemini = client_for(serve(app).await);
    assert_eq!(gemini.generate("hello").await, Ok("echo: hello".to_string()));
  }

  #[tokio::test]
  async fn non_success_status_is_http_error() {
    let app = Router::new().route(
      "/models/:model",
      post(|| async {
        (StatusCode::TOO_MANY_REQUESTS, Json(json!({"error": {"message": "quota exceeded"}})))
      }),
    );
    let gemini = client_for(serve(app).await);
    assert_eq!(
      gemini.generate("hello").await,
      Err(UpstreamError::Http { status: 429, message: "quota exceeded".into() })
    );
  }

  #[tokio::test]
  async fn slow_upstream_is_a_timeout() {
    let app = Router::new().route(
      "/models/:model",
      post(|| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Json(json!({"candidates": []}))
      }),
    );
    let cfg = ServerConfig {
      api_key: Some("test-key".into()),
      base_url: serve(app).await,
      upstream_timeout: Duration::from_millis(200),
      ..ServerConfig::default()
    };
    let gemini = Gemini::from_config(&cfg).expect("client");
    assert_eq!(gemini.generate("hello").await, Err(UpstreamError::Timeout(Duration::from_millis(200))));
  }

  #[tokio::test]
  async fn unreachable_upstream_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let gemini = client_for(format!("http://{}", addr));
    assert!(matches!(gemini.generate("hello").await, Err(UpstreamError::Transport(_))));
  }
}
