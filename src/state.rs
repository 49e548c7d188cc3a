//! Application state shared by all handlers.
//!
//! This module owns:
//!   - the server configuration (env)
//!   - prompts + exam timing (TOML or defaults)
//!   - the optional upstream generator
//!
//! There is no shared mutable state: every exam session lives inside the
//! WebSocket task that created it.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::config::{load_app_config, AppConfig, ExamTiming, Prompts, ServerConfig};
use crate::domain::{Question, QuestionSet};
use crate::error::{ExplainError, GenerationError, UpstreamError};
use crate::explain::{answer_follow_up, explain_prompt, explain_question};
use crate::gemini::{Gemini, TextGenerator};
use crate::questions::{generate_questions, QuestionRequest};

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub prompts: Prompts,
    pub timing: ExamTiming,
    pub generator: Option<Arc<dyn TextGenerator>>,
}

impl AppState {
    /// Build state from config: load TOML (if any) and init the upstream client.
    #[instrument(level = "info", skip_all)]
    pub fn from_config(config: ServerConfig) -> Self {
        let app_cfg = config
            .config_path
            .as_deref()
            .and_then(load_app_config)
            .unwrap_or_default();

        let generator: Option<Arc<dyn TextGenerator>> = match Gemini::from_config(&config) {
            Some(g) => {
                info!(target: "edutest", base_url = %g.base_url, model = %g.model, timeout = ?g.timeout, "Upstream generator enabled.");
                Some(Arc::new(g))
            }
            None => {
                warn!(target: "edutest", "GEMINI_API_KEY not set; question generation and explanations will fail.");
                None
            }
        };

        Self::with_generator(config, app_cfg, generator)
    }

    pub fn with_generator(
        config: ServerConfig,
        app_cfg: AppConfig,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        Self { config, prompts: app_cfg.prompts, timing: app_cfg.timing, generator }
    }

    fn generator(&self) -> Result<&dyn TextGenerator, UpstreamError> {
        self.generator.as_deref().ok_or(UpstreamError::NotConfigured)
    }

    pub async fn generate_questions(&self, req: &QuestionRequest) -> Result<QuestionSet, GenerationError> {
        req.validate()?;
        let generator = self.generator()?;
        generate_questions(generator, &self.prompts, req).await
    }

    pub async fn explain(&self, prompt: &str) -> Result<String, ExplainError> {
        if prompt.trim().is_empty() {
            return Err(ExplainError::EmptyPrompt);
        }
        let generator = self.generator()?;
        explain_prompt(generator, prompt).await
    }

    pub async fn explain_question(&self, question: &Question, selected: Option<u8>) -> Result<String, ExplainError> {
        let generator = self.generator()?;
        explain_question(generator, &self.prompts, question, selected).await
    }

    pub async fn answer_follow_up(&self, question: &Question, prior: &str, follow_up: &str) -> Result<String, ExplainError> {
        let generator = self.generator()?;
        answer_follow_up(generator, &self.prompts, question, prior, follow_up).await
    }
}
