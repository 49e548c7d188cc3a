//! Configuration: process environment (`ServerConfig`) plus an optional TOML
//! file with prompt templates and the exam timing policy (`AppConfig`).
//!
//! Environment variables:
//!   GEMINI_API_KEY        : enables the upstream generator
//!   GEMINI_BASE_URL       : default "https://generativelanguage.googleapis.com/v1beta"
//!   GEMINI_MODEL          : default "gemini-2.5-flash"
//!   UPSTREAM_TIMEOUT_SECS : default 60
//!   FRONTEND_ORIGINS      : comma list or "*" (default localhost:3000/3001);
//!                           "https://*.vercel.app" allows any subdomain
//!   FRONTEND_URL          : one more allowed origin (deployed frontend)
//!   PORT                  : single port, overrides PORT_CANDIDATES
//!   PORT_CANDIDATES       : ordered list, default "5000,5001,5002,3000,3001"
//!   BIND_ADDR             : default "0.0.0.0"
//!   APP_ENV               : "development" exposes error details in responses
//!   EDUTEST_CONFIG_PATH   : TOML file, see `AppConfig`

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_PORTS: [u16; 5] = [5000, 5001, 5002, 3000, 3001];
const DEFAULT_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:3001"];
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllowedOrigins {
  Any,
  List(Vec<String>),
}

impl AllowedOrigins {
  pub fn has_wildcards(&self) -> bool {
    match self {
      AllowedOrigins::Any => false,
      AllowedOrigins::List(list) => list.iter().any(|o| o.contains("://*.")),
    }
  }

  /// Exact match, or `scheme://*.suffix` matching any subdomain of `suffix`.
  pub fn allows(&self, origin: &str) -> bool {
    let list = match self {
      AllowedOrigins::Any => return true,
      AllowedOrigins::List(list) => list,
    };
    list.iter().any(|allowed| match allowed.split_once("://*.") {
      Some((scheme, suffix)) => origin
        .strip_prefix(scheme)
        .and_then(|rest| rest.strip_prefix("://"))
        .and_then(|host| host.strip_suffix(suffix))
        .and_then(|sub| sub.strip_suffix('.'))
        .is_some_and(|sub| !sub.is_empty() && !sub.contains('/')),
      None => allowed == origin,
    })
  }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
  pub api_key: Option<String>,
  pub base_url: String,
  pub model: String,
  pub upstream_timeout: Duration,
  pub origins: AllowedOrigins,
  pub port_candidates: Vec<u16>,
  pub bind_addr: IpAddr,
  /// Development mode: error bodies carry raw details (model output, upstream bodies).
  pub development: bool,
  pub config_path: Option<String>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self::from_lookup(|_| None)
  }
}

impl ServerConfig {
  pub fn from_env() -> Self {
    Self::from_lookup(|k| std::env::var(k).ok())
  }

  /// Build from any key lookup; `from_env` passes the process environment.
  pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
    let non_empty = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let upstream_timeout = non_empty("UPSTREAM_TIMEOUT_SECS")
      .and_then(|v| v.parse::<u64>().ok())
      .filter(|secs| *secs > 0)
      .map(Duration::from_secs)
      .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));

    let mut origins = match non_empty("FRONTEND_ORIGINS").map(|v| split_list(&v)) {
      Some(list) if list.iter().any(|o| o == "*") => AllowedOrigins::Any,
      Some(list) => AllowedOrigins::List(list),
      None => AllowedOrigins::List(DEFAULT_ORIGINS.iter().map(|s| s.to_string()).collect()),
    };
    if let (AllowedOrigins::List(list), Some(url)) = (&mut origins, non_empty("FRONTEND_URL")) {
      let url = url.trim_end_matches('/').to_string();
      if !list.contains(&url) {
        list.push(url);
      }
    }

    let port_candidates = match non_empty("PORT").and_then(|p| p.parse::<u16>().ok()) {
      Some(port) => vec![port],
      None => non_empty("PORT_CANDIDATES")
        .map(|v| parse_port_candidates(&v))
        .filter(|ports| !ports.is_empty())
        .unwrap_or_else(|| DEFAULT_PORTS.to_vec()),
    };

    let bind_addr = non_empty("BIND_ADDR")
      .and_then(|v| v.parse::<IpAddr>().ok())
      .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    Self {
      api_key: non_empty("GEMINI_API_KEY"),
      base_url: non_empty("GEMINI_BASE_URL")
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
      model: non_empty("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
      upstream_timeout,
      origins,
      port_candidates,
      bind_addr,
      development: non_empty("APP_ENV").is_some_and(|v| v.eq_ignore_ascii_case("development")),
      config_path: non_empty("EDUTEST_CONFIG_PATH"),
    }
  }
}

fn split_list(v: &str) -> Vec<String> {
  v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/// Parse "5000, 5001,abc" into `[5000, 5001]`; invalid entries are skipped.
pub fn parse_port_candidates(v: &str) -> Vec<u16> {
  v.split(',').filter_map(|p| p.trim().parse::<u16>().ok()).collect()
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub timing: ExamTiming,
}

/// Prompt templates sent to the generator. Placeholders are `{name}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  /// `{count}`, `{subject}`, `{topic}`
  pub questions_template: String,
  /// `{question}`, `{correct}`, `{selected}`
  pub explanation_template: String,
  /// `{follow_up}`, `{question}`, `{explanation}`
  pub follow_up_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      questions_template: r#"Generate exactly {count} multiple-choice questions for {subject} {topic} for testing. Return ONLY a valid JSON array with no additional text, commentary or markdown formatting. Each question object must have exactly these keys: id (number starting from 1), question (string), options (array of exactly 4 distinct strings), correctAnswer (number 0-3, the index of the correct option), explanation (string with a detailed explanation of the correct answer).

Example format:
[
  {
    "id": 1,
    "question": "When did the Indian National Congress hold its first session?",
    "options": ["1885", "1886", "1887", "1888"],
    "correctAnswer": 0,
    "explanation": "The Indian National Congress held its first session in December 1885 in Bombay, presided over by W.C. Bonnerjee with 72 delegates attending."
  }
]"#.into(),
      explanation_template: "Explain why the following is the correct answer.\nQuestion: {question}\nCorrect Answer: {correct}\nUser Answer: {selected}\nProvide a clear, detailed explanation suitable for exam practice.".into(),
      follow_up_template: "Follow-up: {follow_up}\n\nOriginal question: {question}\nOriginal explanation: {explanation}\nPlease answer the follow-up clearly and concisely.".into(),
    }
  }
}

/// How long a timed test lasts for a given number of questions.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExamTiming {
  pub short_exam_max_questions: usize,
  pub short_exam_secs: u32,
  pub long_exam_secs: u32,
}

impl Default for ExamTiming {
  fn default() -> Self {
    Self { short_exam_max_questions: 50, short_exam_secs: 30 * 60, long_exam_secs: 60 * 60 }
  }
}

impl ExamTiming {
  pub fn duration_for(&self, question_count: usize) -> u32 {
    if question_count <= self.short_exam_max_questions {
      self.short_exam_secs
    } else {
      self.long_exam_secs
    }
  }
}

/// Load `AppConfig` from a TOML path. On any parsing/IO error, returns None.
pub fn load_app_config(path: &str) -> Option<AppConfig> {
  match std::fs::read_to_string(path) {
    Ok(s) => match toml::from_str::<AppConfig>(&s) {
      Ok(cfg) => {
        info!(target: "edutest", %path, "Loaded app config (TOML)");
        if cfg.timing.short_exam_secs == 0 || cfg.timing.long_exam_secs == 0 {
          warn!(target: "edutest", %path, "Exam durations of zero are invalid; using default timing");
          return Some(AppConfig { timing: ExamTiming::default(), ..cfg });
        }
        Some(cfg)
      }
      Err(e) => {
        error!(target: "edutest", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "edutest", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
