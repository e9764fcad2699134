//! Shared types, errors, context, and session state for the Parley batch engine.
//!
//! This crate provides the foundational types used across all other Parley crates:
//! - `ParleyError`: unified error taxonomy
//! - `Context`: shared key-value store that hooks and tools read and write during a turn
//! - `SessionState`: the plain value describing one conversation

pub mod session;

pub use session::{
    merge_data, FieldMap, HistoryEntry, HistoryRole, SessionId, SessionMetadata, SessionState,
};

/// Unified error type for all Parley subsystems.
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    // === Route configuration ===
    #[error("Route validation failed: {0}")]
    RouteValidation(String),

    #[error("Step '{step}' not found in route '{route}'")]
    StepNotFound { route: String, step: String },

    #[error("Route '{route}' revisits step '{step}' within a single turn")]
    CycleDetected { route: String, step: String },

    #[error("Condition parse error: {0}")]
    ConditionParse(String),

    #[error("Condition on field '{field}' cannot be evaluated: {message}")]
    ConditionEval { field: String, message: String },

    // === Hooks ===
    #[error("{phase} hook failed on step '{step}': {message}")]
    HookFailed {
        phase: String,
        step: String,
        message: String,
    },

    // === Generation ===
    #[error("Generation via {generator} failed: {message}")]
    Generation { generator: String, message: String },

    #[error("Generation cancelled")]
    Cancelled,

    // === Tools ===
    #[error("Tool '{tool}' is not registered")]
    ToolNotFound { tool: String },

    #[error("Tool '{tool}' error: {message}")]
    ToolError { tool: String, message: String },

    // === Persistence ===
    #[error("Session '{id}' not found")]
    SessionNotFound { id: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ParleyError {
    /// Returns `true` when the error stems from how a route was declared
    /// rather than from anything that happened during a turn.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ParleyError::RouteValidation(_)
                | ParleyError::StepNotFound { .. }
                | ParleyError::CycleDetected { .. }
                | ParleyError::ConditionParse(_)
        )
    }

    /// Stable snake_case tag for logs and serialized results.
    pub fn kind(&self) -> &'static str {
        match self {
            ParleyError::RouteValidation(_) => "route_validation",
            ParleyError::StepNotFound { .. } => "step_not_found",
            ParleyError::CycleDetected { .. } => "cycle_detected",
            ParleyError::ConditionParse(_) => "condition_parse",
            ParleyError::ConditionEval { .. } => "condition_eval",
            ParleyError::HookFailed { .. } => "hook_failed",
            ParleyError::Generation { .. } => "generation",
            ParleyError::Cancelled => "cancelled",
            ParleyError::ToolNotFound { .. } => "tool_not_found",
            ParleyError::ToolError { .. } => "tool_error",
            ParleyError::SessionNotFound { .. } => "session_not_found",
            ParleyError::Io(_) => "io",
            ParleyError::Json(_) => "json",
            ParleyError::Other(_) => "other",
        }
    }
}

/// A convenience alias for `Result<T, ParleyError>`.
pub type Result<T> = std::result::Result<T, ParleyError>;

// ---------------------------------------------------------------------------
// Context: shared key-value store for a turn
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::Arc;

/// Key-value store shared by every hook and tool that runs during a turn.
///
/// Cloning a `Context` yields another handle to the **same** inner state, so a
/// value written by one step's prepare hook is visible to the next step's.
/// Use [`clone_isolated`](Context::clone_isolated) for an independent copy.
#[derive(Clone)]
pub struct Context {
    inner: Arc<tokio::sync::RwLock<ContextInner>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ContextInner {
    values: HashMap<String, serde_json::Value>,
    logs: Vec<String>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::from_values(HashMap::new())
    }

    /// Create a context seeded with caller-supplied values.
    pub fn from_values(values: HashMap<String, serde_json::Value>) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(ContextInner {
                values,
                logs: Vec::new(),
            })),
        }
    }

    /// Insert or overwrite a key.
    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.write().await.values.insert(key.into(), value);
    }

    /// Read a value by key (cloned).
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.read().await.values.get(key).cloned()
    }

    /// Convenience accessor that returns a `String`. Falls back to `default`
    /// when the key is absent or not a JSON string.
    pub async fn get_string(&self, key: &str, default: &str) -> String {
        self.inner
            .read()
            .await
            .values
            .get(key)
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| default.to_owned())
    }

    /// Append a free-form log entry.
    pub async fn append_log(&self, entry: impl Into<String>) {
        self.inner.write().await.logs.push(entry.into());
    }

    /// All log entries appended so far.
    pub async fn logs(&self) -> Vec<String> {
        self.inner.read().await.logs.clone()
    }

    /// Shallow copy of the current values map.
    pub async fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.inner.read().await.values.clone()
    }

    /// Deep copy that is fully independent of the original context.
    pub async fn clone_isolated(&self) -> Context {
        let guard = self.inner.read().await;
        Context {
            inner: Arc::new(tokio::sync::RwLock::new(guard.clone())),
        }
    }

    /// Merge `updates` into the context. Existing keys not present in
    /// `updates` are preserved.
    pub async fn apply_updates(&self, updates: HashMap<String, serde_json::Value>) {
        let mut guard = self.inner.write().await;
        guard.values.extend(updates);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}
