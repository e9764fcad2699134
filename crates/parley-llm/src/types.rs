use serde::{Deserialize, Serialize};

use parley_types::{HistoryEntry, HistoryRole};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl From<HistoryRole> for Role {
    fn from(role: HistoryRole) -> Self {
        match role {
            HistoryRole::User => Role::User,
            HistoryRole::Assistant => Role::Assistant,
            HistoryRole::System => Role::System,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

impl From<&HistoryEntry> for Message {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            role: entry.role.into(),
            content: entry.content.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// GenerationRequest / Generation
// ---------------------------------------------------------------------------

/// Everything the generator needs for one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    /// Union of the batch's collect fields, in batch order.
    pub collect_fields: Vec<String>,
    /// JSON object schema describing the structured output the model should
    /// return. `None` when the batch collects nothing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
}

/// The single reply produced for a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Generation {
    /// A plain-text reply with no structured output.
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            structured: None,
        }
    }

    /// Attach structured output. Non-object values are ignored.
    pub fn with_structured(mut self, value: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = value {
            self.structured = Some(map);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
    }

    #[test]
    fn history_entry_converts_to_message() {
        let session = parley_types::SessionState::with_id("s")
            .with_message(HistoryRole::User, "my name is Ada", None);
        let msg = Message::from(&session.history[0]);
        assert_eq!(msg, Message::user("my name is Ada"));
    }

    #[test]
    fn with_structured_ignores_non_objects() {
        let g = Generation::text("hi").with_structured(json!([1, 2]));
        assert!(g.structured.is_none());

        let g = Generation::text("hi").with_structured(json!({"name": "Ada"}));
        assert_eq!(g.structured.unwrap().get("name"), Some(&json!("Ada")));
    }

    #[test]
    fn request_omits_missing_schema() {
        let req = GenerationRequest::default();
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("response_schema").is_none());
    }
}
