//! Exam WebSocket. One connection owns one exam session: client messages,
//! the one-second clock, and finished background calls (question generation,
//! explanations) are all handled by a single task, so session transitions
//! never race.
//!
//! Background results carry the epoch they were started in. Starting a new
//! exam bumps the epoch and any older result is dropped on arrival.

use std::sync::Arc;
use std::time::Duration;

use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{QuestionSet, QuestionView};
use crate::error::{ExplainError, GenerationError, SessionError};
use crate::explain::ExplanationLog;
use crate::protocol::{ClientWsMessage, ScoreOut, ServerWsMessage, SessionStatusOut};
use crate::questions::{QuestionRequest, DEFAULT_COUNT, DEFAULT_SUBJECT, DEFAULT_TOPIC};
use crate::session::{ExamSession, SessionPhase};
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "edutest", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Result of work spawned off the connection task.
#[derive(Debug)]
enum Background {
  Generated {
    epoch: u64,
    duration_secs: Option<u32>,
    result: Result<QuestionSet, GenerationError>,
  },
  Explained {
    epoch: u64,
    question_index: usize,
    ordinal: u32,
    follow_up: bool,
    result: Result<String, ExplainError>,
  },
}

fn new_ticker() -> Interval {
  let mut ticker = interval(Duration::from_secs(1));
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  ticker
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "edutest", "WebSocket connected");
  let (tx, mut rx) = mpsc::channel::<Background>(16);
  let mut conn = Connection::new(state, tx);
  let mut ticker = new_ticker();

  loop {
    let outgoing: Option<Vec<Message>> = tokio::select! {
      incoming = socket.recv() => match incoming {
        Some(Ok(Message::Text(txt))) => Some(encode_all(conn.on_text(&txt, &mut ticker))),
        Some(Ok(Message::Ping(payload))) => Some(vec![Message::Pong(payload)]),
        Some(Ok(Message::Close(_))) | None => None,
        Some(Ok(_)) => Some(Vec::new()),
        Some(Err(e)) => {
          warn!(target: "edutest", error = %e, "WS receive error");
          None
        }
      },
      _ = ticker.tick(), if conn.session.is_in_progress() => Some(encode_all(conn.on_tick())),
      Some(bg) = rx.recv() => Some(encode_all(conn.on_background(bg, &mut ticker))),
    };

    let Some(outgoing) = outgoing else { break };
    let mut closed = false;
    for msg in outgoing {
      if let Err(e) = socket.send(msg).await {
        error!(target: "edutest", error = %e, "WS send error");
        closed = true;
        break;
      }
    }
    if closed {
      break;
    }
  }
  info!(target: "edutest", session_id = ?conn.session_id, phase = ?conn.session.phase(), "WebSocket disconnected");
}

fn encode_all(replies: Vec<ServerWsMessage>) -> Vec<Message> {
  replies
    .into_iter()
    .map(|reply| {
      let out = serde_json::to_string(&reply).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "kind": "internal", "message": format!("Serialization error: {}", e) }).to_string()
      });
      Message::Text(out)
    })
    .collect()
}

/// Per-connection exam state.
struct Connection {
  state: Arc<AppState>,
  tx: mpsc::Sender<Background>,
  session: ExamSession,
  explanations: ExplanationLog,
  epoch: u64,
  session_id: Option<String>,
}

impl Connection {
  fn new(state: Arc<AppState>, tx: mpsc::Sender<Background>) -> Self {
    Self {
      state,
      tx,
      session: ExamSession::new(),
      explanations: ExplanationLog::new(),
      epoch: 0,
      session_id: None,
    }
  }

  fn on_text(&mut self, txt: &str, ticker: &mut Interval) -> Vec<ServerWsMessage> {
    match serde_json::from_str::<ClientWsMessage>(txt) {
      Ok(incoming) => {
        debug!(target: "edutest", "WS received: {:?}", &incoming);
        self.on_client(incoming, ticker)
      }
      Err(e) => vec![ServerWsMessage::error("invalid_message", format!("Invalid JSON: {}", e))],
    }
  }

  fn on_client(&mut self, msg: ClientWsMessage, ticker: &mut Interval) -> Vec<ServerWsMessage> {
    match msg {
      ClientWsMessage::Ping => vec![ServerWsMessage::Pong],

      ClientWsMessage::Start { subject, topic, count, duration_seconds } => {
        let req = QuestionRequest {
          subject: subject.unwrap_or_else(|| DEFAULT_SUBJECT.into()),
          topic: topic.unwrap_or_else(|| DEFAULT_TOPIC.into()),
          count: count.unwrap_or(DEFAULT_COUNT),
        };
        self.start(req, duration_seconds, ticker)
      }

      ClientWsMessage::Select { question_index, option_index } => {
        match self.session.select_answer(question_index, option_index) {
          Ok(()) => vec![self.status()],
          Err(e) => vec![session_error(&e)],
        }
      }

      ClientWsMessage::Navigate { index } => match self.session.navigate(index) {
        Ok(()) => vec![self.status()],
        Err(e) => vec![session_error(&e)],
      },

      ClientWsMessage::Finish => match self.session.finish() {
        Ok(()) => self.finished(),
        Err(e) => vec![session_error(&e)],
      },

      ClientWsMessage::Status => vec![self.status()],

      ClientWsMessage::Explain { question_index } => self.explain(question_index),

      ClientWsMessage::FollowUp { question_index, text } => self.follow_up(question_index, text),
    }
  }

  /// Abandon whatever came before and request a fresh question set.
  fn start(&mut self, req: QuestionRequest, duration_secs: Option<u32>, ticker: &mut Interval) -> Vec<ServerWsMessage> {
    if duration_secs == Some(0) {
      return vec![session_error(&SessionError::ZeroDuration)];
    }
    if let Err(e) = req.validate() {
      return vec![ServerWsMessage::error(e.kind(), e.to_string())];
    }

    self.epoch += 1;
    self.session = ExamSession::new();
    self.explanations = ExplanationLog::new();
    self.session_id = None;
    ticker.reset();
    info!(target: "questions", epoch = self.epoch, subject = %req.subject, topic = %req.topic, count = req.count, "WS exam requested");

    let reply = ServerWsMessage::Generating {
      subject: req.subject.clone(),
      topic: req.topic.clone(),
      count: req.count,
    };

    let state = self.state.clone();
    let tx = self.tx.clone();
    let epoch = self.epoch;
    tokio::spawn(async move {
      let result = state.generate_questions(&req).await;
      if tx.send(Background::Generated { epoch, duration_secs, result }).await.is_err() {
        debug!(target: "questions", epoch, "Connection closed before questions arrived");
      }
    });

    vec![reply]
  }

  fn explain(&mut self, question_index: usize) -> Vec<ServerWsMessage> {
    if !self.session.is_finished() {
      return vec![session_error(&SessionError::InvalidTransition { op: "explain", phase: self.session.phase() })];
    }
    let Some(question) = self.session.question(question_index).cloned() else {
      return vec![session_error(&SessionError::QuestionOutOfRange { index: question_index, len: self.session.len() })];
    };

    if let Some(text) = self.explanations.text(question.id) {
      return vec![ServerWsMessage::Explanation { question_index, text: text.to_string() }];
    }
    if !self.explanations.begin(question.id) {
      return vec![ServerWsMessage::error("explanation_pending", "An explanation for this question is already on its way")];
    }

    let selected = self.session.selected(question_index);
    let state = self.state.clone();
    let tx = self.tx.clone();
    let epoch = self.epoch;
    tokio::spawn(async move {
      let result = state.explain_question(&question, selected).await;
      let _ = tx
        .send(Background::Explained { epoch, question_index, ordinal: question.id, follow_up: false, result })
        .await;
    });
    Vec::new()
  }

  fn follow_up(&mut self, question_index: usize, text: String) -> Vec<ServerWsMessage> {
    if !self.session.is_finished() {
      return vec![session_error(&SessionError::InvalidTransition { op: "follow_up", phase: self.session.phase() })];
    }
    let Some(question) = self.session.question(question_index).cloned() else {
      return vec![session_error(&SessionError::QuestionOutOfRange { index: question_index, len: self.session.len() })];
    };
    if text.trim().is_empty() {
      return vec![ServerWsMessage::error(ExplainError::EmptyPrompt.kind(), "Follow-up question is empty")];
    }
    let Some(prior) = self.explanations.text(question.id).map(str::to_string) else {
      return vec![ServerWsMessage::error("no_explanation", "Ask for an explanation before a follow-up")];
    };
    if !self.explanations.begin(question.id) {
      return vec![ServerWsMessage::error("explanation_pending", "An explanation for this question is already on its way")];
    }

    let state = self.state.clone();
    let tx = self.tx.clone();
    let epoch = self.epoch;
    tokio::spawn(async move {
      let result = state.answer_follow_up(&question, &prior, &text).await;
      let _ = tx
        .send(Background::Explained { epoch, question_index, ordinal: question.id, follow_up: true, result })
        .await;
    });
    Vec::new()
  }

  fn on_tick(&mut self) -> Vec<ServerWsMessage> {
    if !self.session.is_in_progress() {
      return Vec::new();
    }
    match self.session.tick() {
      Ok(SessionPhase::Finished) => {
        let mut out = vec![ServerWsMessage::Tick { remaining: 0 }];
        out.extend(self.finished());
        out
      }
      Ok(_) => vec![ServerWsMessage::Tick { remaining: self.session.remaining() }],
      Err(e) => {
        debug!(target: "session", error = %e, "Tick ignored");
        Vec::new()
      }
    }
  }

  fn on_background(&mut self, bg: Background, ticker: &mut Interval) -> Vec<ServerWsMessage> {
    match bg {
      Background::Generated { epoch, .. } | Background::Explained { epoch, .. } if epoch != self.epoch => {
        debug!(target: "edutest", epoch, current = self.epoch, "Discarding stale background result");
        Vec::new()
      }

      Background::Generated { duration_secs, result, .. } => {
        let set = match result {
          Ok(set) => set,
          Err(e) => {
            warn!(target: "questions", kind = e.kind(), error = %e, "WS question generation failed");
            return vec![ServerWsMessage::error(e.kind(), e.to_string())];
          }
        };

        let duration = duration_secs.unwrap_or_else(|| self.state.timing.duration_for(set.len()));
        let questions: Vec<QuestionView> = set.iter().map(QuestionView::from).collect();
        if let Err(e) = self.session.start(set, duration) {
          return vec![session_error(&e)];
        }
        ticker.reset();

        let session_id = Uuid::new_v4().to_string();
        info!(target: "session", %session_id, questions = questions.len(), duration, "WS exam started");
        self.session_id = Some(session_id.clone());
        vec![ServerWsMessage::Started { session_id, duration_seconds: duration, questions }]
      }

      Background::Explained { question_index, ordinal, follow_up, result, .. } => match result {
        Ok(answer) => {
          let text = if follow_up {
            self.explanations.append_follow_up(ordinal, &answer)
          } else {
            self.explanations.complete(ordinal, answer)
          };
          vec![ServerWsMessage::Explanation { question_index, text: text.to_string() }]
        }
        Err(e) => {
          warn!(target: "explain", question_index, follow_up, error = %e, "WS explanation failed");
          self.explanations.abandon(ordinal);
          vec![ServerWsMessage::error(e.kind(), e.to_string())]
        }
      },
    }
  }

  fn status(&self) -> ServerWsMessage {
    let current = self.session.current_index();
    ServerWsMessage::Status(SessionStatusOut {
      phase: self.session.phase(),
      current,
      total: self.session.len(),
      answered: self.session.answered_count(),
      remaining: self.session.remaining(),
      remaining_display: self.session.remaining_display(),
      selected: self.session.selected(current),
    })
  }

  fn finished(&self) -> Vec<ServerWsMessage> {
    match (self.session.score(), self.session.review()) {
      (Ok(score), Ok(review)) => {
        info!(target: "session", session_id = ?self.session_id, correct = score.correct, total = score.total, "Exam scored");
        vec![ServerWsMessage::Finished { score: ScoreOut::from(score), review }]
      }
      (Err(e), _) | (_, Err(e)) => vec![session_error(&e)],
    }
  }
}

fn session_error(e: &SessionError) -> ServerWsMessage {
  ServerWsMessage::error(e.kind(), e.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{AppConfig, ServerConfig};
  use crate::error::UpstreamError;
  use crate::gemini::testing::ScriptedGenerator;
  use crate::gemini::TextGenerator;

  const TWO: &str = r#"[
    {"id": 1, "question": "Q1?", "options": ["a","b","c","d"], "correctAnswer": 1, "explanation": "e1"},
    {"id": 2, "question": "Q2?", "options": ["a","b","c","d"], "correctAnswer": 3, "explanation": "e2"}
  ]"#;

  fn connection(generator: ScriptedGenerator) -> (Connection, mpsc::Receiver<Background>) {
    let generator: Arc<dyn TextGenerator> = Arc::new(generator);
    let state = AppState::with_generator(ServerConfig::default(), AppConfig::default(), Some(generator));
    let (tx, rx) = mpsc::channel(16);
    (Connection::new(Arc::new(state), tx), rx)
  }

  fn send(conn: &mut Connection, ticker: &mut Interval, json: serde_json::Value) -> Vec<ServerWsMessage> {
    conn.on_text(&json.to_string(), ticker)
  }

  async fn started(conn: &mut Connection, rx: &mut mpsc::Receiver<Background>, ticker: &mut Interval, secs: u32) {
    let replies = send(conn, ticker, serde_json::json!({"type": "start", "count": 2, "durationSeconds": secs}));
    assert!(matches!(replies.as_slice(), [ServerWsMessage::Generating { count: 2, .. }]));
    let bg = rx.recv().await.expect("generation result");
    let replies = conn.on_background(bg, ticker);
    match replies.as_slice() {
      [ServerWsMessage::Started { duration_seconds, questions, .. }] => {
        assert_eq!(*duration_seconds, secs);
        assert_eq!(questions.len(), 2);
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[tokio::test]
  async fn exam_runs_until_the_clock_expires() {
    let (mut conn, mut rx) = connection(ScriptedGenerator::ok(TWO));
    let mut ticker = new_ticker();
    started(&mut conn, &mut rx, &mut ticker, 2).await;

    send(&mut conn, &mut ticker, serde_json::json!({"type": "select", "questionIndex": 0, "optionIndex": 1}));
    assert!(matches!(conn.on_tick().as_slice(), [ServerWsMessage::Tick { remaining: 1 }]));
    match conn.on_tick().as_slice() {
      [ServerWsMessage::Tick { remaining: 0 }, ServerWsMessage::Finished { score, review }] => {
        assert_eq!(score.correct, 1);
        assert_eq!(score.total, 2);
        assert_eq!(review.len(), 2);
      }
      other => panic!("unexpected {other:?}"),
    }
    assert!(conn.on_tick().is_empty());
  }

  #[tokio::test]
  async fn status_reflects_navigation_and_selection() {
    let (mut conn, mut rx) = connection(ScriptedGenerator::ok(TWO));
    let mut ticker = new_ticker();
    started(&mut conn, &mut rx, &mut ticker, 60).await;

    send(&mut conn, &mut ticker, serde_json::json!({"type": "select", "questionIndex": 1, "optionIndex": 2}));
    let replies = send(&mut conn, &mut ticker, serde_json::json!({"type": "navigate", "index": 1}));
    match replies.as_slice() {
      [ServerWsMessage::Status(s)] => {
        assert_eq!(s.current, 1);
        assert_eq!(s.answered, 1);
        assert_eq!(s.selected, Some(2));
        assert_eq!(s.remaining_display, "00:01:00");
      }
      other => panic!("unexpected {other:?}"),
    }

    let replies = send(&mut conn, &mut ticker, serde_json::json!({"type": "navigate", "index": 5}));
    assert!(matches!(replies.as_slice(), [ServerWsMessage::Error { kind, .. }] if kind == "out_of_range"));
  }

  #[tokio::test]
  async fn restart_discards_results_from_the_previous_epoch() {
    let (mut conn, mut rx) = connection(ScriptedGenerator::ok(TWO));
    let mut ticker = new_ticker();
    send(&mut conn, &mut ticker, serde_json::json!({"type": "start"}));
    send(&mut conn, &mut ticker, serde_json::json!({"type": "start"}));

    let mut started = 0;
    for _ in 0..2 {
      let bg = rx.recv().await.expect("result");
      if matches!(conn.on_background(bg, &mut ticker).as_slice(), [ServerWsMessage::Started { .. }]) {
        started += 1;
      }
    }
    assert_eq!(started, 1);
    assert!(conn.session.is_in_progress());
  }

  #[tokio::test]
  async fn explanations_require_a_finished_exam_and_accumulate() {
    let generator = ScriptedGenerator::new(vec![
      Ok(TWO.into()),
      Ok("Because b.".into()),
      Ok("Also c is wrong.".into()),
    ]);
    let (mut conn, mut rx) = connection(generator);
    let mut ticker = new_ticker();
    started(&mut conn, &mut rx, &mut ticker, 60).await;

    let early = send(&mut conn, &mut ticker, serde_json::json!({"type": "explain", "questionIndex": 0}));
    assert!(matches!(early.as_slice(), [ServerWsMessage::Error { kind, .. }] if kind == "invalid_transition"));

    send(&mut conn, &mut ticker, serde_json::json!({"type": "finish"}));
    assert!(send(&mut conn, &mut ticker, serde_json::json!({"type": "explain", "questionIndex": 0})).is_empty());
    let bg = rx.recv().await.expect("explanation");
    assert!(matches!(
      conn.on_background(bg, &mut ticker).as_slice(),
      [ServerWsMessage::Explanation { question_index: 0, text }] if text == "Because b."
    ));

    send(&mut conn, &mut ticker, serde_json::json!({"type": "follow_up", "questionIndex": 0, "text": "And c?"}));
    let bg = rx.recv().await.expect("follow-up");
    match conn.on_background(bg, &mut ticker).as_slice() {
      [ServerWsMessage::Explanation { text, .. }] => {
        assert_eq!(text, "Because b.\n\nFollow-up answer:\nAlso c is wrong.");
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[tokio::test]
  async fn failed_generation_leaves_the_session_idle() {
    let (mut conn, mut rx) =
      connection(ScriptedGenerator::err(UpstreamError::Http { status: 500, message: "boom".into() }));
    let mut ticker = new_ticker();
    send(&mut conn, &mut ticker, serde_json::json!({"type": "start"}));
    let bg = rx.recv().await.expect("result");
    let replies = conn.on_background(bg, &mut ticker);
    assert!(matches!(replies.as_slice(), [ServerWsMessage::Error { kind, .. }] if kind == "upstream_unavailable"));
    assert_eq!(conn.session.phase(), SessionPhase::Idle);
  }

  #[tokio::test]
  async fn bad_messages_get_error_replies() {
    let (mut conn, _rx) = connection(ScriptedGenerator::ok(TWO));
    let mut ticker = new_ticker();
    let replies = conn.on_text("not json", &mut ticker);
    assert!(matches!(replies.as_slice(), [ServerWsMessage::Error { kind, .. }] if kind == "invalid_message"));
    let replies = send(&mut conn, &mut ticker, serde_json::json!({"type": "start", "durationSeconds": 0}));
    assert!(matches!(replies.as_slice(), [ServerWsMessage::Error { kind, .. }] if kind == "invalid_duration"));
    let replies = send(&mut conn, &mut ticker, serde_json::json!({"type": "finish"}));
    assert!(matches!(replies.as_slice(), [ServerWsMessage::Error { kind, .. }] if kind == "invalid_transition"));
  }
}
