//! Exam practice backend: LLM-generated multiple-choice questions, a timed
//! exam session, and explanations with follow-ups.
//!
//! The `edutest-backend` binary serves the HTTP/WebSocket API; `edutest-cli`
//! is a terminal client that takes an exam against a running backend.

pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod explain;
pub mod gemini;
pub mod listener;
pub mod parser;
pub mod protocol;
pub mod questions;
pub mod resolver;
pub mod routes;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod util;
