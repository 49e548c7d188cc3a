//! Question generation: request validation, prompt construction, one upstream
//! call, then the parser. No retries here; the caller decides whether to try again.

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::Prompts;
use crate::domain::QuestionSet;
use crate::error::GenerationError;
use crate::gemini::TextGenerator;
use crate::parser::parse_question_set;
use crate::util::{fill_template, trunc_for_log};

pub const DEFAULT_SUBJECT: &str = "UPSC";
pub const DEFAULT_TOPIC: &str = "Modern Indian History (1857-1900)";
pub const DEFAULT_COUNT: u32 = 5;
pub const MAX_COUNT: u32 = 200;

/// Body of `POST /api/questions`. Missing fields take the service defaults.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionRequest {
  #[serde(default = "default_subject")]
  pub subject: String,
  #[serde(default = "default_topic")]
  pub topic: String,
  #[serde(default = "default_count")]
  pub count: u32,
}

fn default_subject() -> String { DEFAULT_SUBJECT.into() }
fn default_topic() -> String { DEFAULT_TOPIC.into() }
fn default_count() -> u32 { DEFAULT_COUNT }

impl Default for QuestionRequest {
  fn default() -> Self {
    Self { subject: default_subject(), topic: default_topic(), count: default_count() }
  }
}

impl QuestionRequest {
  pub fn validate(&self) -> Result<(), GenerationError> {
    if self.subject.trim().is_empty() {
      return Err(GenerationError::InvalidRequest("subject must not be empty".into()));
    }
    if self.topic.trim().is_empty() {
      return Err(GenerationError::InvalidRequest("topic must not be empty".into()));
    }
    if self.count == 0 || self.count > MAX_COUNT {
      return Err(GenerationError::InvalidRequest(format!("count must be between 1 and {}", MAX_COUNT)));
    }
    Ok(())
  }
}

pub fn build_questions_prompt(prompts: &Prompts, req: &QuestionRequest) -> String {
  let count = req.count.to_string();
  fill_template(
    &prompts.questions_template,
    &[("count", count.as_str()), ("subject", req.subject.trim()), ("topic", req.topic.trim())],
  )
}

/// Generate a full, validated question set or a classified error.
#[instrument(
  level = "info",
  target = "questions",
  skip(generator, prompts, req),
  fields(subject = %req.subject, topic = %req.topic, count = req.count)
)]
pub async fn generate_questions(
  generator: &dyn TextGenerator,
  prompts: &Prompts,
  req: &QuestionRequest,
) -> Result<QuestionSet, GenerationError> {
  req.validate()?;
  let prompt = build_questions_prompt(prompts, req);

  let start = std::time::Instant::now();
  let raw = generator.generate(&prompt).await.map_err(|e| {
    error!(target: "questions", elapsed = ?start.elapsed(), error = %e, "Upstream call failed during question generation");
    GenerationError::from(e)
  })?;

  match parse_question_set(&raw) {
    Ok(set) => {
      if set.len() != req.count as usize {
        warn!(target: "questions", requested = req.count, received = set.len(), "Model returned a different number of questions");
      }
      info!(target: "questions", elapsed = ?start.elapsed(), count = set.len(), "Question set generated");
      Ok(set)
    }
    Err(e) => {
      error!(target: "questions", error = %e, raw_preview = %trunc_for_log(&raw, 200), "Model output rejected");
      Err(e.into())
    }
  }
}

/// Map a free-text practice request onto a canonical topic name.
pub fn canonical_topic(input: &str) -> String {
  const TOPICS: [(&str, &str); 7] = [
    ("modern history", "Modern Indian History (1857-1947)"),
    ("ancient history", "Ancient Indian History"),
    ("medieval history", "Medieval Indian History"),
    ("current affairs", "Current Affairs"),
    ("geography", "Indian Geography"),
    ("polity", "Indian Polity"),
    ("economy", "Indian Economy"),
  ];

  let lowered = input.trim().to_lowercase();
  if let Some((_, topic)) = TOPICS.iter().find(|(key, _)| lowered.contains(key)) {
    return topic.to_string();
  }

  let mut chars = lowered.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::{ParseError, UpstreamError};
  use crate::gemini::testing::ScriptedGenerator;

  const THREE: &str = r#"```json
[
  {"id": 9, "question": "Q1?", "options": ["a","b","c","d"], "correctAnswer": 2, "explanation": "e1"},
  {"id": 9, "question": "Q2?", "options": ["a","b","c","d"], "correctAnswer": 0, "explanation": "e2"},
  {"id": 9, "question": "Q3?", "options": ["a","b","c","d"], "correctAnswer": 1, "explanation": "e3"}
]
```"#;

  fn req(count: u32) -> QuestionRequest {
    QuestionRequest { subject: "UPSC".into(), topic: "Indian Polity".into(), count }
  }

  #[tokio::test]
  async fn generates_and_renumbers() {
    let gen = ScriptedGenerator::ok(THREE);
    let set = generate_questions(&gen, &Prompts::default(), &req(3)).await.expect("set");
    assert_eq!(set.iter().map(|q| q.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(set.iter().map(|q| q.correct_answer).collect::<Vec<_>>(), vec![2, 0, 1]);

    let prompts = gen.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Generate exactly 3 multiple-choice questions for UPSC Indian Polity"));
    assert!(prompts[0].contains("\"correctAnswer\": 0"), "worked example included");
  }

  #[tokio::test]
  async fn count_mismatch_is_still_accepted() {
    let gen = ScriptedGenerator::ok(THREE);
    let set = generate_questions(&gen, &Prompts::default(), &req(10)).await.expect("set");
    assert_eq!(set.len(), 3);
  }

  #[tokio::test]
  async fn upstream_failure_is_unavailable() {
    let gen = ScriptedGenerator::err(UpstreamError::Http { status: 503, message: "overloaded".into() });
    let err = generate_questions(&gen, &Prompts::default(), &req(3)).await.expect_err("fails");
    assert_eq!(
      err,
      GenerationError::UpstreamUnavailable(UpstreamError::Http { status: 503, message: "overloaded".into() })
    );
    assert!(err.is_retryable());
  }

  #[tokio::test]
  async fn no_text_is_empty_upstream_response() {
    let gen = ScriptedGenerator::err(UpstreamError::NoText);
    let err = generate_questions(&gen, &Prompts::default(), &req(3)).await.expect_err("fails");
    assert_eq!(err, GenerationError::EmptyUpstreamResponse);
  }

  #[tokio::test]
  async fn parse_errors_propagate_unchanged() {
    let gen = ScriptedGenerator::ok("Sorry, I can't help with that.");
    let err = generate_questions(&gen, &Prompts::default(), &req(3)).await.expect_err("fails");
    assert_eq!(err, GenerationError::Parse(ParseError::EmptyOrNotArray));
  }

  #[tokio::test]
  async fn invalid_requests_never_reach_upstream() {
    let gen = ScriptedGenerator::ok(THREE);
    for bad in [
      QuestionRequest { subject: " ".into(), ..req(3) },
      QuestionRequest { topic: "".into(), ..req(3) },
      req(0),
      req(MAX_COUNT + 1),
    ] {
      let err = generate_questions(&gen, &Prompts::default(), &bad).await.expect_err("invalid");
      assert!(matches!(err, GenerationError::InvalidRequest(_)), "{bad:?}");
    }
    assert!(gen.prompts().is_empty());
  }

  #[test]
  fn request_defaults_fill_missing_fields() {
    let r: QuestionRequest = serde_json::from_str(r#"{"count": 12}"#).expect("json");
    assert_eq!(r.subject, DEFAULT_SUBJECT);
    assert_eq!(r.topic, DEFAULT_TOPIC);
    assert_eq!(r.count, 12);
  }

  #[test]
  fn canonical_topic_maps_keywords() {
    assert_eq!(canonical_topic("I need UPSC Modern History questions"), "Modern Indian History (1857-1947)");
    assert_eq!(canonical_topic("mixed test with current affairs"), "Current Affairs");
    assert_eq!(canonical_topic("GEOGRAPHY of rivers"), "Indian Geography");
    assert_eq!(canonical_topic("  organic chemistry "), "Organic chemistry");
    assert_eq!(canonical_topic(""), "");
  }
}
