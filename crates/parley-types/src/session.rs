//! Session state: the plain value describing one conversation.
//!
//! Every operation here returns a new `SessionState` instead of mutating in
//! place. The batch executor relies on that to keep its last good checkpoint
//! untouched while a phase works on the next snapshot.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collected field values keyed by field name.
pub type FieldMap = HashMap<String, serde_json::Value>;

/// Identifier of a single conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    User,
    Assistant,
    System,
}

/// One utterance in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// The mutable-by-replacement record of one conversation.
///
/// `data` is the single canonical record of collected fields, shared across
/// every route the session passes through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: SessionId,
    #[serde(default)]
    pub current_route: Option<String>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub completed_routes: Vec<String>,
    #[serde(default)]
    pub data: FieldMap,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub metadata: SessionMetadata,
}

impl SessionState {
    /// Create an empty session with a generated id.
    pub fn new() -> Self {
        Self::with_id(SessionId::generate())
    }

    /// Create an empty session with the given id.
    pub fn with_id(id: impl Into<SessionId>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            current_route: None,
            current_step: None,
            completed_routes: Vec::new(),
            data: FieldMap::new(),
            history: Vec::new(),
            metadata: SessionMetadata {
                created_at: now,
                last_updated_at: now,
            },
        }
    }

    /// Builder-style helper that seeds collected data.
    pub fn with_data(mut self, data: FieldMap) -> Self {
        self.data = data;
        self
    }

    /// A field is present when its key exists, whatever the value.
    /// `0`, `false`, `""` and `null` all count as present.
    pub fn has_field(&self, field: &str) -> bool {
        self.data.contains_key(field)
    }

    /// See [`merge_data`].
    pub fn merge_data(&self, patch: &FieldMap) -> SessionState {
        merge_data(self, patch)
    }

    /// Move the traversal position to `step_id` within `route_id`.
    pub fn with_position(&self, route_id: &str, step_id: Option<&str>) -> SessionState {
        let mut next = self.clone();
        next.current_route = Some(route_id.to_string());
        next.current_step = step_id.map(String::from);
        next.metadata.last_updated_at = Utc::now();
        next
    }

    /// Mark `route_id` as finished and clear the step position.
    pub fn with_route_completed(&self, route_id: &str) -> SessionState {
        let mut next = self.with_position(route_id, None);
        if !next.completed_routes.iter().any(|r| r == route_id) {
            next.completed_routes.push(route_id.to_string());
        }
        next
    }

    /// Append a history entry.
    pub fn with_message(
        &self,
        role: HistoryRole,
        content: impl Into<String>,
        step_id: Option<&str>,
    ) -> SessionState {
        let mut next = self.clone();
        let now = Utc::now();
        next.history.push(HistoryEntry {
            role,
            content: content.into(),
            step_id: step_id.map(String::from),
            timestamp: now,
        });
        next.metadata.last_updated_at = now;
        next
    }

    /// Explicitly drop fields. This is the only operation that removes data
    /// and the batch engine never calls it.
    pub fn clear_fields<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> SessionState {
        let mut next = self.clone();
        for field in fields {
            next.data.remove(field);
        }
        next.metadata.last_updated_at = Utc::now();
        next
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge `patch` into the session's data, returning a new session.
///
/// Keys in `patch` overwrite existing values; keys absent from `patch` are
/// kept. Merging the same patch twice yields the same data.
pub fn merge_data(session: &SessionState, patch: &FieldMap) -> SessionState {
    let mut next = session.clone();
    if patch.is_empty() {
        return next;
    }
    next.data
        .extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
    next.metadata.last_updated_at = Utc::now();
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, serde_json::Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn merge_keeps_existing_and_overwrites_patched() {
        let session = SessionState::with_id("s1")
            .with_data(fields(&[("name", json!("Ada")), ("age", json!(36))]));
        let merged = session.merge_data(&fields(&[("age", json!(37)), ("email", json!("a@b.c"))]));

        assert_eq!(merged.data.get("name"), Some(&json!("Ada")));
        assert_eq!(merged.data.get("age"), Some(&json!(37)));
        assert_eq!(merged.data.get("email"), Some(&json!("a@b.c")));
        // Original untouched
        assert_eq!(session.data.get("age"), Some(&json!(36)));
        assert!(!session.has_field("email"));
    }

    #[test]
    fn merge_is_idempotent() {
        let session = SessionState::with_id("s1");
        let patch = fields(&[("city", json!("Oslo"))]);
        let once = merge_data(&session, &patch);
        let twice = merge_data(&once, &patch);
        assert_eq!(once.data, twice.data);
    }

    #[test]
    fn empty_patch_returns_equal_session() {
        let session = SessionState::with_id("s1");
        let merged = merge_data(&session, &FieldMap::new());
        assert_eq!(merged, session);
    }

    #[test]
    fn falsy_values_are_present() {
        let session = SessionState::with_id("s1").with_data(fields(&[
            ("zero", json!(0)),
            ("no", json!(false)),
            ("blank", json!("")),
            ("nothing", json!(null)),
        ]));
        for key in ["zero", "no", "blank", "nothing"] {
            assert!(session.has_field(key), "{key} should count as present");
        }
        assert!(!session.has_field("absent"));
    }

    #[test]
    fn position_and_completion() {
        let session = SessionState::with_id("s1").with_position("checkout", Some("address"));
        assert_eq!(session.current_route.as_deref(), Some("checkout"));
        assert_eq!(session.current_step.as_deref(), Some("address"));

        let done = session.with_route_completed("checkout").with_route_completed("checkout");
        assert_eq!(done.current_step, None);
        assert_eq!(done.completed_routes, vec!["checkout".to_string()]);
    }

    #[test]
    fn clear_fields_is_explicit_removal() {
        let session = SessionState::with_id("s1")
            .with_data(fields(&[("a", json!(1)), ("b", json!(2))]));
        let cleared = session.clear_fields(["a"]);
        assert!(!cleared.has_field("a"));
        assert!(cleared.has_field("b"));
    }

    #[test]
    fn history_appends_in_order() {
        let session = SessionState::with_id("s1")
            .with_message(HistoryRole::User, "hi", None)
            .with_message(HistoryRole::Assistant, "hello!", Some("greet"));
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[1].role, HistoryRole::Assistant);
        assert_eq!(session.history[1].step_id.as_deref(), Some("greet"));
    }

    #[test]
    fn session_serializes_without_store_references() {
        let session = SessionState::with_id("abc")
            .with_data(fields(&[("name", json!("Ada"))]));
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["id"], json!("abc"));
        assert_eq!(json["data"]["name"], json!("Ada"));

        let restored: SessionState = serde_json::from_value(json).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
