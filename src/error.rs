//! Error taxonomy shared by the services, the HTTP layer and the terminal client.
//!
//! Each component returns its own enum; conversions between them encode the
//! classification rules (e.g. an upstream call that succeeded but carried no
//! text is `EmptyUpstreamResponse` for generation but `NoExplanationReturned`
//! for explanations).

use std::time::Duration;

use thiserror::Error;

use crate::session::SessionPhase;

/// Failure of a single call to the generative API.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum UpstreamError {
  #[error("GEMINI_API_KEY is not configured")]
  NotConfigured,
  #[error("upstream request timed out after {0:?}")]
  Timeout(Duration),
  #[error("upstream transport error: {0}")]
  Transport(String),
  #[error("upstream HTTP {status}: {message}")]
  Http { status: u16, message: String },
  /// The call completed but the response carried no usable text.
  #[error("upstream response contained no text")]
  NoText,
}

impl UpstreamError {
  /// HTTP status reported by the upstream, when there was one.
  pub fn status(&self) -> Option<u16> {
    match self {
      UpstreamError::Http { status, .. } => Some(*status),
      _ => None,
    }
  }
}

/// Why raw model output could not become a `QuestionSet`.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ParseError {
  #[error("model output is not valid JSON: {reason}")]
  MalformedPayload { raw: String, reason: String },
  #[error("model output is empty or not a JSON array")]
  EmptyOrNotArray,
  #[error("invalid question format at index {index}: {reason}")]
  InvalidQuestionAt { index: usize, reason: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum GenerationError {
  #[error("invalid request: {0}")]
  InvalidRequest(String),
  #[error("upstream unavailable: {0}")]
  UpstreamUnavailable(UpstreamError),
  #[error("upstream returned an empty response")]
  EmptyUpstreamResponse,
  #[error(transparent)]
  Parse(#[from] ParseError),
}

impl From<UpstreamError> for GenerationError {
  fn from(e: UpstreamError) -> Self {
    match e {
      UpstreamError::NoText => GenerationError::EmptyUpstreamResponse,
      other => GenerationError::UpstreamUnavailable(other),
    }
  }
}

impl GenerationError {
  /// Stable machine-readable label used in error bodies and logs.
  pub fn kind(&self) -> &'static str {
    match self {
      GenerationError::InvalidRequest(_) => "invalid_request",
      GenerationError::UpstreamUnavailable(_) => "upstream_unavailable",
      GenerationError::EmptyUpstreamResponse => "empty_upstream_response",
      GenerationError::Parse(ParseError::MalformedPayload { .. }) => "malformed_payload",
      GenerationError::Parse(ParseError::EmptyOrNotArray) => "empty_or_not_array",
      GenerationError::Parse(ParseError::InvalidQuestionAt { .. }) => "invalid_question",
    }
  }

  /// Worth offering the user a "Try again" action.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      GenerationError::UpstreamUnavailable(_) | GenerationError::EmptyUpstreamResponse
    )
  }
}

#[derive(Debug, Error, PartialEq)]
pub enum ExplainError {
  #[error("prompt is empty")]
  EmptyPrompt,
  #[error("upstream unavailable: {0}")]
  UpstreamUnavailable(UpstreamError),
  #[error("No explanation returned")]
  NoExplanationReturned,
}

impl From<UpstreamError> for ExplainError {
  fn from(e: UpstreamError) -> Self {
    match e {
      UpstreamError::NoText => ExplainError::NoExplanationReturned,
      other => ExplainError::UpstreamUnavailable(other),
    }
  }
}

impl ExplainError {
  pub fn kind(&self) -> &'static str {
    match self {
      ExplainError::EmptyPrompt => "empty_prompt",
      ExplainError::UpstreamUnavailable(_) => "upstream_unavailable",
      ExplainError::NoExplanationReturned => "no_explanation_returned",
    }
  }
}

/// Misuse of the exam session state machine.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
  #[error("`{op}` is not valid while the session is {phase:?}")]
  InvalidTransition { op: &'static str, phase: SessionPhase },
  #[error("question index {index} is out of range (0..{len})")]
  QuestionOutOfRange { index: usize, len: usize },
  #[error("option index {0} is out of range (0..=3)")]
  OptionOutOfRange(usize),
  #[error("exam duration must be greater than zero")]
  ZeroDuration,
}

impl SessionError {
  pub fn kind(&self) -> &'static str {
    match self {
      SessionError::InvalidTransition { .. } => "invalid_transition",
      SessionError::QuestionOutOfRange { .. } | SessionError::OptionOutOfRange(_) => "out_of_range",
      SessionError::ZeroDuration => "invalid_duration",
    }
  }
}
