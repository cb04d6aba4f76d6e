//! Scripted reasoning oracle for testing without an LLM endpoint

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use trade_runner::{OracleError, ReasoningOracle};

/// Replies are consumed in order; an empty queue answers with an empty-reply error
#[derive(Default, Clone)]
pub struct ScriptedOracle {
    replies: Arc<Mutex<VecDeque<Result<String, OracleError>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, text: impl Into<String>) -> &Self {
        self.replies.lock().unwrap().push_back(Ok(text.into()));
        self
    }

    pub fn fail(&self, error: OracleError) -> &Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    /// User prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningOracle for ScriptedOracle {
    async fn complete(&self, _system_prompt: &str, user_prompt: &str) -> Result<String, OracleError> {
        self.prompts.lock().unwrap().push(user_prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(OracleError::EmptyReply))
    }
}

/// Reply in the expected shape: reasoning, separator, JSON
pub fn signal_reply(signal: &str, confidence: &str, position_percentage: Option<&str>) -> String {
    let pct = position_percentage
        .map(|p| format!(",\n    \"position_percentage\": {}", p))
        .unwrap_or_default();
    format!(
        "Trend and volume reviewed.\n---SIGNAL_JSON---\n{{\n    \"signal\": \"{}\",\n    \"reason\": \"scripted\",\n    \"stop_loss\": 90,\n    \"take_profit\": 120,\n    \"confidence\": \"{}\"{}\n}}",
        signal, confidence, pct
    )
}
