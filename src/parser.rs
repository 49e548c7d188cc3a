//! Turning raw model output into a validated `QuestionSet`.
//!
//! Extraction is liberal: surrounding whitespace, a leading code fence (with or
//! without a language tag) and commentary before/after the JSON array are all
//! tolerated. Validation is strict: every element must match the question
//! shape, and the first violation rejects the whole set.
//!
//! The model's own `id` values are checked for presence only; questions are
//! renumbered `1..=N` by position.

use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::domain::{Question, QuestionSet, OPTION_COUNT};
use crate::error::ParseError;

const FENCE: &str = "```";

/// Parse and validate raw upstream text.
#[instrument(level = "debug", target = "questions", skip(raw), fields(raw_len = raw.len()))]
pub fn parse_question_set(raw: &str) -> Result<QuestionSet, ParseError> {
  let text = strip_code_fence(raw.trim());
  let candidate = extract_array_span(text).ok_or(ParseError::EmptyOrNotArray)?;

  let value: Value = serde_json::from_str(candidate).map_err(|e| ParseError::MalformedPayload {
    raw: raw.to_string(),
    reason: e.to_string(),
  })?;

  let items = match value {
    Value::Array(items) if !items.is_empty() => items,
    _ => return Err(ParseError::EmptyOrNotArray),
  };

  let mut questions = Vec::with_capacity(items.len());
  for (index, item) in items.iter().enumerate() {
    let ordinal = u32::try_from(index + 1).map_err(|_| invalid(index, "too many questions"))?;
    questions.push(validate_question(index, ordinal, item)?);
  }

  debug!(target: "questions", count = questions.len(), "Question payload validated");
  QuestionSet::new(questions).ok_or(ParseError::EmptyOrNotArray)
}

/// Remove a leading code fence (and optional language tag) plus the closing fence.
fn strip_code_fence(text: &str) -> &str {
  let Some(rest) = text.strip_prefix(FENCE) else { return text };
  let tag_len = rest
    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '+'))
    .unwrap_or(rest.len());
  let body = rest[tag_len..].trim();
  body.strip_suffix(FENCE).map(str::trim_end).unwrap_or(body)
}

/// Outermost `[ ... ]` span: first `[` through last `]`.
fn extract_array_span(text: &str) -> Option<&str> {
  let start = text.find('[')?;
  let end = text.rfind(']')?;
  if end < start { None } else { Some(&text[start..=end]) }
}

fn invalid(index: usize, reason: impl Into<String>) -> ParseError {
  ParseError::InvalidQuestionAt { index, reason: reason.into() }
}

fn validate_question(index: usize, ordinal: u32, item: &Value) -> Result<Question, ParseError> {
  let obj = item.as_object().ok_or_else(|| invalid(index, "element is not an object"))?;

  match obj.get("id") {
    Some(Value::Number(_)) => {}
    Some(Value::String(s)) if s.trim().parse::<f64>().is_ok() => {}
    Some(_) => return Err(invalid(index, "`id` is not numeric")),
    None => return Err(invalid(index, "missing `id`")),
  }

  let question = non_empty_string(obj, "question").map_err(|r| invalid(index, r))?;
  let options = four_distinct_options(obj).map_err(|r| invalid(index, r))?;

  let correct_answer = match obj.get("correctAnswer") {
    None => return Err(invalid(index, "missing `correctAnswer`")),
    Some(v) => match v.as_u64() {
      Some(n) if n < OPTION_COUNT as u64 => n as u8,
      Some(n) => return Err(invalid(index, format!("`correctAnswer` {} is outside 0..=3", n))),
      None => return Err(invalid(index, "`correctAnswer` is not a non-negative integer")),
    },
  };

  let explanation = non_empty_string(obj, "explanation").map_err(|r| invalid(index, r))?;

  Ok(Question { id: ordinal, question, options, correct_answer, explanation })
}

fn non_empty_string(obj: &Map<String, Value>, key: &str) -> Result<String, String> {
  match obj.get(key) {
    Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
    Some(Value::String(_)) => Err(format!("`{}` is empty", key)),
    Some(_) => Err(format!("`{}` is not a string", key)),
    None => Err(format!("missing `{}`", key)),
  }
}

fn four_distinct_options(obj: &Map<String, Value>) -> Result<[String; OPTION_COUNT], String> {
  let arr = match obj.get("options") {
    Some(Value::Array(arr)) => arr,
    Some(_) => return Err("`options` is not an array".into()),
    None => return Err("missing `options`".into()),
  };
  if arr.len() != OPTION_COUNT {
    return Err(format!("`options` has {} entries, expected {}", arr.len(), OPTION_COUNT));
  }

  let mut out: Vec<String> = Vec::with_capacity(OPTION_COUNT);
  for (i, v) in arr.iter().enumerate() {
    let s = v.as_str().ok_or_else(|| format!("option {} is not a string", i))?;
    if out.iter().any(|prev| prev.trim() == s.trim()) {
      return Err(format!("option {} duplicates an earlier option", i));
    }
    out.push(s.to_string());
  }

  out.try_into().map_err(|_| "`options` has the wrong length".to_string())
}
