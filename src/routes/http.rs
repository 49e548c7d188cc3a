//! HTTP endpoint handlers. These are thin wrappers that forward to the services.
//! Each handler is instrumented and logs parameters and basic result info.

use std::sync::Arc;

use axum::{
  extract::{rejection::JsonRejection, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use tracing::{info, instrument, warn};

use crate::error::{ExplainError, GenerationError, ParseError, UpstreamError};
use crate::protocol::*;
use crate::questions::QuestionRequest;
use crate::state::AppState;

#[instrument(level = "info")]
pub async fn http_root() -> impl IntoResponse {
  Json(MessageOut { message: "Backend is working!".into() })
}

/// Liveness check used by clients to pick a live base URL.
#[instrument(level = "info")]
pub async fn http_test() -> impl IntoResponse {
  Json(MessageOut { message: "API endpoint is working!".into() })
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, upstream_configured: state.generator.is_some() })
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_post_questions(
  State(state): State<Arc<AppState>>,
  body: Result<Json<QuestionRequest>, JsonRejection>,
) -> Response {
  let Json(body) = match body {
    Ok(body) => body,
    Err(rejection) => {
      warn!(target: "questions", error = %rejection.body_text(), "Rejected question request body");
      return generation_error_response(&GenerationError::InvalidRequest(rejection.body_text()), state.config.development);
    }
  };
  info!(target: "questions", subject = %body.subject, topic = %body.topic, count = body.count, "HTTP question request");

  match state.generate_questions(&body).await {
    Ok(set) => {
      info!(target: "questions", count = set.len(), "HTTP questions served");
      Json(set).into_response()
    }
    Err(e) => {
      warn!(target: "questions", kind = e.kind(), error = %e, "HTTP question generation failed");
      generation_error_response(&e, state.config.development)
    }
  }
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_post_explain(
  State(state): State<Arc<AppState>>,
  body: Result<Json<ExplainIn>, JsonRejection>,
) -> Response {
  let Json(body) = match body {
    Ok(body) => body,
    Err(rejection) => {
      warn!(target: "explain", error = %rejection.body_text(), "Rejected explain request body");
      let body = ErrorOut {
        error: "Invalid request body".into(),
        message: Some(rejection.body_text()),
        kind: Some("invalid_request".into()),
        details: None,
      };
      return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    }
  };

  match state.explain(&body.prompt).await {
    Ok(explanation) => Json(ExplainOut { explanation }).into_response(),
    Err(e) => {
      warn!(target: "explain", error = %e, "HTTP explanation failed");
      explain_error_response(&e)
    }
  }
}

#[instrument(level = "info")]
pub async fn http_payment_create_order() -> impl IntoResponse {
  (
    StatusCode::NOT_IMPLEMENTED,
    Json(MessageOut { message: "Payment service is disabled".into() }),
  )
}

#[instrument(level = "info")]
pub async fn http_payment_verify() -> impl IntoResponse {
  (
    StatusCode::NOT_IMPLEMENTED,
    Json(MessageOut { message: "Payment verification is disabled".into() }),
  )
}

fn upstream_status(e: &UpstreamError) -> StatusCode {
  match e {
    UpstreamError::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
    UpstreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    _ => StatusCode::BAD_GATEWAY,
  }
}

/// Map a generation failure to status + `{error, message, kind, details?}`.
/// Raw model output only appears in `details`, and only in development mode.
pub fn generation_error_response(e: &GenerationError, development: bool) -> Response {
  let status = match e {
    GenerationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
    GenerationError::UpstreamUnavailable(u) => upstream_status(u),
    GenerationError::EmptyUpstreamResponse => StatusCode::BAD_GATEWAY,
    GenerationError::Parse(_) => StatusCode::INTERNAL_SERVER_ERROR,
  };

  let details = match e {
    GenerationError::Parse(ParseError::MalformedPayload { raw, .. }) => Some(raw.clone()),
    GenerationError::UpstreamUnavailable(UpstreamError::Http { message, .. }) => Some(message.clone()),
    _ => None,
  };

  let error = match e {
    GenerationError::InvalidRequest(_) => "Invalid question request",
    _ => "Failed to generate questions",
  };

  let body = ErrorOut {
    error: error.into(),
    message: Some(e.to_string()),
    kind: Some(e.kind().into()),
    details: details.filter(|_| development),
  };
  (status, Json(body)).into_response()
}

pub fn explain_error_response(e: &ExplainError) -> Response {
  let (status, error, details) = match e {
    ExplainError::EmptyPrompt => (StatusCode::BAD_REQUEST, "Prompt is required", None),
    ExplainError::NoExplanationReturned => (StatusCode::BAD_GATEWAY, "No explanation returned", None),
    ExplainError::UpstreamUnavailable(UpstreamError::NotConfigured) => {
      (StatusCode::INTERNAL_SERVER_ERROR, "GEMINI_API_KEY not configured", None)
    }
    ExplainError::UpstreamUnavailable(u) => (upstream_status(u), "Failed to generate explanation", Some(u.to_string())),
  };
  let body = ErrorOut { error: error.into(), message: None, kind: None, details };
  (status, Json(body)).into_response()
}
