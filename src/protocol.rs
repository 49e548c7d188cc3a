//! Public protocol structs for HTTP and WebSocket endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::QuestionView;
use crate::session::{ReviewItem, Score};

/// Messages the client can send over the exam WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    Start {
        #[serde(default)]
        subject: Option<String>,
        #[serde(default)]
        topic: Option<String>,
        #[serde(default)]
        count: Option<u32>,
        #[serde(default, rename = "durationSeconds")]
        duration_seconds: Option<u32>,
    },
    Select {
        #[serde(rename = "questionIndex")]
        question_index: usize,
        #[serde(rename = "optionIndex")]
        option_index: usize,
    },
    Navigate {
        index: usize,
    },
    Finish,
    Status,
    Explain {
        #[serde(rename = "questionIndex")]
        question_index: usize,
    },
    FollowUp {
        #[serde(rename = "questionIndex")]
        question_index: usize,
        text: String,
    },
}

/// Messages the server sends back over the exam WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Generating {
        subject: String,
        topic: String,
        count: u32,
    },
    Started {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "durationSeconds")]
        duration_seconds: u32,
        questions: Vec<QuestionView>,
    },
    Status(SessionStatusOut),
    Tick {
        remaining: u32,
    },
    Finished {
        score: ScoreOut,
        review: Vec<ReviewItem>,
    },
    Explanation {
        #[serde(rename = "questionIndex")]
        question_index: usize,
        text: String,
    },
    Error {
        kind: String,
        message: String,
    },
}

impl ServerWsMessage {
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        ServerWsMessage::Error { kind: kind.to_string(), message: message.into() }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusOut {
    pub phase: crate::session::SessionPhase,
    pub current: usize,
    pub total: usize,
    pub answered: usize,
    pub remaining: u32,
    pub remaining_display: String,
    pub selected: Option<u8>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ScoreOut {
    pub correct: usize,
    pub total: usize,
    pub percentage: f32,
}

impl From<Score> for ScoreOut {
    fn from(s: Score) -> Self {
        ScoreOut { correct: s.correct, total: s.total, percentage: s.percentage() }
    }
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Serialize, Deserialize)]
pub struct ExplainIn {
    #[serde(default)]
    pub prompt: String,
}
#[derive(Debug, Serialize, Deserialize)]
pub struct ExplainOut {
    pub explanation: String,
}

/// Error body shared by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorOut {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageOut {
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthOut {
    pub ok: bool,
    pub upstream_configured: bool,
}
