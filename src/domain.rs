//! Domain models: generated questions and the validated set they travel in.

use serde::Serialize;

/// Number of answer options every question carries.
pub const OPTION_COUNT: usize = 4;

/// One multiple-choice question. Built only by the parser; never mutated afterwards.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
  /// 1-based ordinal within its set.
  pub id: u32,
  pub question: String,
  pub options: [String; OPTION_COUNT],
  /// Index into `options`, always in `0..=3`.
  pub correct_answer: u8,
  pub explanation: String,
}

impl Question {
  /// Text of the keyed option. Empty if the key does not name an option.
  pub fn correct_option(&self) -> &str {
    self.option(self.correct_answer).unwrap_or_default()
  }

  /// Option text for an index, if it names one.
  pub fn option(&self, index: u8) -> Option<&str> {
    self.options.get(index as usize).map(String::as_str)
  }
}

/// Ordered, non-empty collection of questions produced by one generation request.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct QuestionSet(Vec<Question>);

impl QuestionSet {
  /// Wrap already-validated questions. Returns `None` for an empty list.
  /// Only the parser builds sets outside of tests.
  pub(crate) fn new(questions: Vec<Question>) -> Option<Self> {
    if questions.is_empty() { None } else { Some(Self(questions)) }
  }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn get(&self, index: usize) -> Option<&Question> { self.0.get(index) }

  pub fn iter(&self) -> std::slice::Iter<'_, Question> { self.0.iter() }

  pub fn as_slice(&self) -> &[Question] { &self.0 }
}

impl<'a> IntoIterator for &'a QuestionSet {
  type Item = &'a Question;
  type IntoIter = std::slice::Iter<'a, Question>;
  fn into_iter(self) -> Self::IntoIter { self.0.iter() }
}

/// Question as shown while an exam is running: no answer key, no explanation.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct QuestionView {
  pub id: u32,
  pub question: String,
  pub options: [String; OPTION_COUNT],
}

impl From<&Question> for QuestionView {
  fn from(q: &Question) -> Self {
    Self { id: q.id, question: q.question.clone(), options: q.options.clone() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Question {
    Question {
      id: 1,
      question: "When did the INC hold its first session?".into(),
      options: ["1885".into(), "1886".into(), "1887".into(), "1888".into()],
      correct_answer: 0,
      explanation: "Bombay, December 1885.".into(),
    }
  }

  #[test]
  fn serializes_with_camel_case_answer_key() {
    let json = serde_json::to_value(sample()).expect("serialize");
    assert_eq!(json["correctAnswer"], 0);
    assert_eq!(json["options"].as_array().map(|a| a.len()), Some(4));
  }

  #[test]
  fn empty_set_is_rejected() {
    assert!(QuestionSet::new(vec![]).is_none());
    assert_eq!(QuestionSet::new(vec![sample()]).map(|s| s.len()), Some(1));
  }

  #[test]
  fn out_of_range_key_has_no_correct_text() {
    let q = Question { correct_answer: 9, ..sample() };
    assert_eq!(q.correct_option(), "");
    assert_eq!(q.option(9), None);
    assert_eq!(sample().correct_option(), "1885");
  }

  #[test]
  fn view_hides_answer_key() {
    let json = serde_json::to_value(QuestionView::from(&sample())).expect("serialize");
    assert!(json.get("correctAnswer").is_none());
    assert!(json.get("explanation").is_none());
  }
}
