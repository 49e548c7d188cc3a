//! Explanations for reviewed questions, plus follow-up Q&A.
//!
//! The service side builds prompts and funnels them through a `TextGenerator`.
//! `ExplanationLog` is the consumer-side record of what has been asked per
//! question; follow-up answers are appended, never replacing earlier text.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::Prompts;
use crate::domain::Question;
use crate::error::ExplainError;
use crate::gemini::TextGenerator;
use crate::util::fill_template;

pub const FOLLOW_UP_DELIMITER: &str = "\n\nFollow-up answer:\n";
const NOT_ANSWERED: &str = "Not answered";

pub fn build_explanation_prompt(prompts: &Prompts, question: &Question, selected: Option<u8>) -> String {
  let selected = selected.and_then(|s| question.option(s)).unwrap_or(NOT_ANSWERED);
  fill_template(
    &prompts.explanation_template,
    &[
      ("question", question.question.as_str()),
      ("correct", question.correct_option()),
      ("selected", selected),
    ],
  )
}

pub fn build_follow_up_prompt(prompts: &Prompts, question: &Question, prior: &str, follow_up: &str) -> String {
  fill_template(
    &prompts.follow_up_template,
    &[("follow_up", follow_up.trim()), ("question", question.question.as_str()), ("explanation", prior)],
  )
}

/// Send an arbitrary prompt; backs `POST /api/explain`.
#[instrument(level = "info", target = "explain", skip(generator, prompt), fields(prompt_len = prompt.len()))]
pub async fn explain_prompt(generator: &dyn TextGenerator, prompt: &str) -> Result<String, ExplainError> {
  if prompt.trim().is_empty() {
    return Err(ExplainError::EmptyPrompt);
  }
  match generator.generate(prompt).await {
    Ok(text) => {
      info!(target: "explain", response_len = text.len(), "Explanation received");
      Ok(text)
    }
    Err(e) => {
      warn!(target: "explain", error = %e, "Explanation request failed");
      Err(e.into())
    }
  }
}

pub async fn explain_question(
  generator: &dyn TextGenerator,
  prompts: &Prompts,
  question: &Question,
  selected: Option<u8>,
) -> Result<String, ExplainError> {
  let prompt = build_explanation_prompt(prompts, question, selected);
  explain_prompt(generator, &prompt).await
}

/// Answer a follow-up. Returns only the new answer; callers append it.
pub async fn answer_follow_up(
  generator: &dyn TextGenerator,
  prompts: &Prompts,
  question: &Question,
  prior: &str,
  follow_up: &str,
) -> Result<String, ExplainError> {
  if follow_up.trim().is_empty() {
    return Err(ExplainError::EmptyPrompt);
  }
  let prompt = build_follow_up_prompt(prompts, question, prior, follow_up);
  explain_prompt(generator, &prompt).await
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
  Pending,
  Ready,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExplanationEntry {
  pub text: String,
  pub status: EntryStatus,
}

/// Accumulated explanations keyed by question ordinal.
#[derive(Debug, Default)]
pub struct ExplanationLog {
  entries: BTreeMap<u32, ExplanationEntry>,
}

impl ExplanationLog {
  pub fn new() -> Self { Self::default() }

  pub fn get(&self, ordinal: u32) -> Option<&ExplanationEntry> { self.entries.get(&ordinal) }

  /// Mark a request as in flight. Returns false if one is already pending.
  pub fn begin(&mut self, ordinal: u32) -> bool {
    let entry = self
      .entries
      .entry(ordinal)
      .or_insert_with(|| ExplanationEntry { text: String::new(), status: EntryStatus::Ready });
    if entry.status == EntryStatus::Pending {
      return false;
    }
    entry.status = EntryStatus::Pending;
    true
  }

  /// Store the first explanation. Existing text (a repeated request) is replaced.
  pub fn complete(&mut self, ordinal: u32, text: String) -> &str {
    let entry = self.entries.entry(ordinal).or_insert_with(|| ExplanationEntry {
      text: String::new(),
      status: EntryStatus::Ready,
    });
    entry.text = text;
    entry.status = EntryStatus::Ready;
    &entry.text
  }

  /// Append a follow-up answer after the delimiter.
  pub fn append_follow_up(&mut self, ordinal: u32, answer: &str) -> &str {
    let entry = self.entries.entry(ordinal).or_insert_with(|| ExplanationEntry {
      text: String::new(),
      status: EntryStatus::Ready,
    });
    entry.text.push_str(FOLLOW_UP_DELIMITER);
    entry.text.push_str(answer);
    entry.status = EntryStatus::Ready;
    &entry.text
  }

  /// A request failed: return the entry to Ready, or drop it if it never had text.
  pub fn abandon(&mut self, ordinal: u32) {
    let empty = match self.entries.get_mut(&ordinal) {
      Some(entry) => {
        entry.status = EntryStatus::Ready;
        entry.text.is_empty()
      }
      None => false,
    };
    if empty {
      self.entries.remove(&ordinal);
    }
  }

  /// Accumulated text, if a first explanation has arrived.
  pub fn text(&self, ordinal: u32) -> Option<&str> {
    self.entries.get(&ordinal).map(|e| e.text.as_str()).filter(|t| !t.is_empty())
  }
}
