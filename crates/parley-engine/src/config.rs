//! Executor configuration.

use std::path::Path;

use parley_types::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Append the model's message to session history after a successful turn.
    pub record_history: bool,
    /// Most recent history entries sent with each generation request.
    pub history_window: usize,
    /// Parse a JSON object out of the message when the generator returns no
    /// structured output.
    pub extract_structured_from_message: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            record_history: true,
            history_window: 20,
            extract_structured_from_message: true,
        }
    }
}

impl ExecutorConfig {
    /// Read a JSON config file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
