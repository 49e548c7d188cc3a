//! Timed exam session state machine.
//!
//! `Idle -> InProgress -> Finished`. The session does not own a clock: whoever
//! drives it (the WebSocket task, the terminal client) calls `tick()` once per
//! second while the session is in progress. All transitions take `&mut self`,
//! so a single owner serializes them.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{Question, QuestionSet, OPTION_COUNT};
use crate::error::SessionError;
use crate::util::format_clock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
  Idle,
  InProgress,
  Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Score {
  pub correct: usize,
  pub total: usize,
}

impl Score {
  pub fn percentage(&self) -> f32 {
    if self.total == 0 { 0.0 } else { self.correct as f32 * 100.0 / self.total as f32 }
  }

  pub fn incorrect(&self) -> usize { self.total - self.correct }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
  Correct,
  Incorrect,
  Unanswered,
}

/// One row of the post-exam review.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
  pub ordinal: u32,
  pub question: String,
  pub selected: Option<u8>,
  pub selected_text: Option<String>,
  pub correct_answer: u8,
  pub correct_text: String,
  pub outcome: Outcome,
}

impl ReviewItem {
  /// What the candidate picked, as shown in the review.
  pub fn your_answer(&self) -> &str {
    self.selected_text.as_deref().unwrap_or("Not answered")
  }
}

#[derive(Debug)]
pub struct ExamSession {
  phase: SessionPhase,
  questions: Option<QuestionSet>,
  current: usize,
  answers: BTreeMap<u32, u8>,
  remaining: u32,
}

impl Default for ExamSession {
  fn default() -> Self { Self::new() }
}

impl ExamSession {
  pub fn new() -> Self {
    Self {
      phase: SessionPhase::Idle,
      questions: None,
      current: 0,
      answers: BTreeMap::new(),
      remaining: 0,
    }
  }

  pub fn phase(&self) -> SessionPhase { self.phase }

  pub fn is_in_progress(&self) -> bool { self.phase == SessionPhase::InProgress }

  pub fn is_finished(&self) -> bool { self.phase == SessionPhase::Finished }

  pub fn remaining(&self) -> u32 { self.remaining }

  pub fn remaining_display(&self) -> String { format_clock(self.remaining) }

  pub fn current_index(&self) -> usize { self.current }

  pub fn len(&self) -> usize { self.questions.as_ref().map_or(0, QuestionSet::len) }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  pub fn questions(&self) -> Option<&QuestionSet> { self.questions.as_ref() }

  pub fn question(&self, index: usize) -> Option<&Question> {
    self.questions.as_ref().and_then(|s| s.get(index))
  }

  pub fn current_question(&self) -> Option<&Question> { self.question(self.current) }

  pub fn answered_count(&self) -> usize { self.answers.len() }

  /// Stored choice for the question at `index`, if any.
  pub fn selected(&self, index: usize) -> Option<u8> {
    self.question(index).and_then(|q| self.answers.get(&q.id).copied())
  }

  /// Idle -> InProgress.
  pub fn start(&mut self, questions: QuestionSet, duration_secs: u32) -> Result<(), SessionError> {
    if self.phase != SessionPhase::Idle {
      return Err(SessionError::InvalidTransition { op: "start", phase: self.phase });
    }
    if duration_secs == 0 {
      return Err(SessionError::ZeroDuration);
    }
    info!(target: "session", questions = questions.len(), duration_secs, "Exam session started");
    self.questions = Some(questions);
    self.current = 0;
    self.answers.clear();
    self.remaining = duration_secs;
    self.phase = SessionPhase::InProgress;
    Ok(())
  }

  /// Record (or overwrite) the choice for one question. Does not move the cursor.
  pub fn select_answer(&mut self, question_index: usize, option_index: usize) -> Result<(), SessionError> {
    self.require_in_progress("select_answer")?;
    if option_index >= OPTION_COUNT {
      return Err(SessionError::OptionOutOfRange(option_index));
    }
    let ordinal = self.question_at(question_index)?.id;
    self.answers.insert(ordinal, option_index as u8);
    debug!(target: "session", question_index, option_index, "Answer recorded");
    Ok(())
  }

  /// Move the cursor. Out-of-range targets are rejected, not clamped.
  pub fn navigate(&mut self, target: usize) -> Result<(), SessionError> {
    self.require_in_progress("navigate")?;
    self.question_at(target)?;
    self.current = target;
    Ok(())
  }

  /// One clock second. Returns the phase after the tick.
  pub fn tick(&mut self) -> Result<SessionPhase, SessionError> {
    match self.phase {
      SessionPhase::Idle => Err(SessionError::InvalidTransition { op: "tick", phase: self.phase }),
      SessionPhase::Finished => Ok(SessionPhase::Finished),
      SessionPhase::InProgress => {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
          info!(target: "session", answered = self.answers.len(), "Time is up; session finished");
          self.phase = SessionPhase::Finished;
        }
        Ok(self.phase)
      }
    }
  }

  /// Explicit submit. A second call is a no-op.
  pub fn finish(&mut self) -> Result<(), SessionError> {
    match self.phase {
      SessionPhase::Idle => Err(SessionError::InvalidTransition { op: "finish", phase: self.phase }),
      SessionPhase::Finished => Ok(()),
      SessionPhase::InProgress => {
        info!(target: "session", remaining = self.remaining, answered = self.answers.len(), "Session submitted");
        self.phase = SessionPhase::Finished;
        Ok(())
      }
    }
  }

  /// Correct answers over total. Unanswered counts as incorrect.
  pub fn score(&self) -> Result<Score, SessionError> {
    let set = self.finished_set("score")?;
    let correct = set
      .iter()
      .filter(|q| self.answers.get(&q.id) == Some(&q.correct_answer))
      .count();
    Ok(Score { correct, total: set.len() })
  }

  pub fn review(&self) -> Result<Vec<ReviewItem>, SessionError> {
    let set = self.finished_set("review")?;
    Ok(set
      .iter()
      .map(|q| {
        let selected = self.answers.get(&q.id).copied();
        let outcome = match selected {
          None => Outcome::Unanswered,
          Some(s) if s == q.correct_answer => Outcome::Correct,
          Some(_) => Outcome::Incorrect,
        };
        ReviewItem {
          ordinal: q.id,
          question: q.question.clone(),
          selected,
          selected_text: selected.and_then(|s| q.option(s)).map(str::to_string),
          correct_answer: q.correct_answer,
          correct_text: q.correct_option().to_string(),
          outcome,
        }
      })
      .collect())
  }

  fn require_in_progress(&self, op: &'static str) -> Result<(), SessionError> {
    if self.phase == SessionPhase::InProgress {
      Ok(())
    } else {
      Err(SessionError::InvalidTransition { op, phase: self.phase })
    }
  }

  fn question_at(&self, index: usize) -> Result<&Question, SessionError> {
    let len = self.len();
    self.question(index).ok_or(SessionError::QuestionOutOfRange { index, len })
  }

  fn finished_set(&self, op: &'static str) -> Result<&QuestionSet, SessionError> {
    match (&self.phase, &self.questions) {
      (SessionPhase::Finished, Some(set)) => Ok(set),
      _ => Err(SessionError::InvalidTransition { op, phase: self.phase }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn set_of(answers: &[u8]) -> QuestionSet {
    let questions = answers
      .iter()
      .enumerate()
      .map(|(i, &correct)| Question {
        id: i as u32 + 1,
        question: format!("Question {}?", i + 1),
        options: ["a".into(), "b".into(), "c".into(), "d".into()],
        correct_answer: correct,
        explanation: "because".into(),
      })
      .collect();
    QuestionSet::new(questions).expect("non-empty")
  }

  fn started(answers: &[u8], secs: u32) -> ExamSession {
    let mut s = ExamSession::new();
    s.start(set_of(answers), secs).expect("start");
    s
  }

  #[test]
  fn five_ticks_finish_a_five_second_session_and_a_sixth_is_a_no_op() {
    let mut s = started(&[0, 1], 5);
    for _ in 0..4 {
      assert_eq!(s.tick(), Ok(SessionPhase::InProgress));
    }
    assert_eq!(s.tick(), Ok(SessionPhase::Finished));
    assert_eq!(s.remaining(), 0);
    assert_eq!(s.tick(), Ok(SessionPhase::Finished));
    assert_eq!(s.remaining(), 0);
    assert!(s.is_finished());
  }

  #[test]
  fn start_requires_positive_duration_and_idle_state() {
    let mut s = ExamSession::new();
    assert_eq!(s.start(set_of(&[0]), 0), Err(SessionError::ZeroDuration));
    assert_eq!(s.phase(), SessionPhase::Idle);
    s.start(set_of(&[0]), 10).expect("start");
    assert!(matches!(
      s.start(set_of(&[0]), 10),
      Err(SessionError::InvalidTransition { op: "start", .. })
    ));
  }

  #[test]
  fn select_answer_overwrites_and_does_not_advance() {
    let mut s = started(&[2, 0, 1], 60);
    s.select_answer(0, 1).expect("select");
    s.select_answer(0, 1).expect("same again");
    assert_eq!(s.selected(0), Some(1));
    assert_eq!(s.answered_count(), 1);
    s.select_answer(0, 2).expect("change");
    assert_eq!(s.selected(0), Some(2));
    assert_eq!(s.current_index(), 0);
  }

  #[test]
  fn select_answer_validates_ranges() {
    let mut s = started(&[0, 0], 60);
    assert_eq!(s.select_answer(0, 4), Err(SessionError::OptionOutOfRange(4)));
    assert_eq!(
      s.select_answer(2, 0),
      Err(SessionError::QuestionOutOfRange { index: 2, len: 2 })
    );
    assert_eq!(s.answered_count(), 0);
  }

  #[test]
  fn navigate_rejects_out_of_range_and_keeps_answers() {
    let mut s = started(&[0, 1, 2], 60);
    s.select_answer(0, 3).expect("select");
    s.navigate(2).expect("navigate");
    assert_eq!(s.current_index(), 2);
    assert_eq!(s.navigate(3), Err(SessionError::QuestionOutOfRange { index: 3, len: 3 }));
    assert_eq!(s.current_index(), 2);
    assert_eq!(s.selected(0), Some(3));
  }

  #[test]
  fn all_correct_scores_n_of_n() {
    let key = [2, 0, 3, 1];
    let mut s = started(&key, 60);
    for (i, &k) in key.iter().enumerate() {
      s.select_answer(i, k as usize).expect("select");
    }
    s.finish().expect("finish");
    assert_eq!(s.score(), Ok(Score { correct: 4, total: 4 }));
  }

  #[test]
  fn finish_twice_matches_finish_once() {
    let mut s = started(&[1, 1], 60);
    s.select_answer(0, 1).expect("select");
    s.finish().expect("finish");
    let first = (s.phase(), s.remaining(), s.score());
    s.finish().expect("second finish is a no-op");
    assert_eq!((s.phase(), s.remaining(), s.score()), first);
    assert_eq!(s.score().map(|sc| sc.correct), Ok(1));
  }

  #[test]
  fn idle_and_finished_sessions_reject_mutation() {
    let mut idle = ExamSession::new();
    assert!(matches!(idle.tick(), Err(SessionError::InvalidTransition { op: "tick", .. })));
    assert!(matches!(idle.finish(), Err(SessionError::InvalidTransition { op: "finish", .. })));
    assert!(matches!(idle.score(), Err(SessionError::InvalidTransition { op: "score", .. })));

    let mut done = started(&[0], 60);
    done.finish().expect("finish");
    assert!(matches!(
      done.select_answer(0, 0),
      Err(SessionError::InvalidTransition { op: "select_answer", phase: SessionPhase::Finished })
    ));
    assert!(matches!(done.navigate(0), Err(SessionError::InvalidTransition { .. })));
  }

  #[test]
  fn score_is_unavailable_while_in_progress() {
    let s = started(&[0], 60);
    assert!(matches!(s.score(), Err(SessionError::InvalidTransition { phase: SessionPhase::InProgress, .. })));
  }

  #[test]
  fn review_distinguishes_unanswered_from_wrong() {
    let mut s = started(&[0, 1, 2], 60);
    s.select_answer(0, 0).expect("right");
    s.select_answer(1, 3).expect("wrong");
    s.finish().expect("finish");

    let review = s.review().expect("review");
    let outcomes: Vec<Outcome> = review.iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes, vec![Outcome::Correct, Outcome::Incorrect, Outcome::Unanswered]);
    assert_eq!(review[1].your_answer(), "d");
    assert_eq!(review[2].your_answer(), "Not answered");
    assert_eq!(review[2].correct_text, "c");

    let score = s.score().expect("score");
    assert_eq!(score, Score { correct: 1, total: 3 });
    assert_eq!(score.incorrect(), 2);
  }

  #[test]
  fn review_survives_a_key_outside_the_options() {
    let mut s = started(&[9], 60);
    s.select_answer(0, 0).expect("select");
    s.finish().expect("finish");
    let review = s.review().expect("review");
    assert_eq!(review[0].outcome, Outcome::Incorrect);
    assert_eq!(review[0].correct_text, "");
    assert_eq!(s.score(), Ok(Score { correct: 0, total: 1 }));
  }

  #[test]
  fn remaining_display_is_a_clock() {
    let s = started(&[0], 30 * 60);
    assert_eq!(s.remaining_display(), "00:30:00");
  }
}
