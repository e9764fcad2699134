//! Pull a JSON object out of free-form model text.
//!
//! Used when a generator returns only a message. Looks for a fenced
//! ```` ```json ```` block first, then for the outermost `{ ... }` span.

use serde_json::{Map, Value};

/// Extract the first JSON object embedded in `message`.
pub fn extract_structured(message: &str) -> Option<Map<String, Value>> {
    if let Some(block) = fenced_block(message) {
        if let Some(map) = parse_object(block) {
            return Some(map);
        }
    }
    let start = message.find('{')?;
    let end = message.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_object(&message[start..=end])
}

fn fenced_block(message: &str) -> Option<&str> {
    let open = message.find("```json")?;
    let body_start = open + "```json".len();
    let rest = &message[body_start..];
    let close = rest.find("```")?;
    Some(rest[..close].trim())
}

fn parse_object(raw: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "Model message did not contain a parseable JSON object");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_fenced_block() {
        let msg = "Thanks!\n```json\n{\"name\": \"Ada\", \"age\": 36}\n```\nAnything else?";
        let map = extract_structured(msg).unwrap();
        assert_eq!(map.get("name"), Some(&json!("Ada")));
        assert_eq!(map.get("age"), Some(&json!(36)));
    }

    #[test]
    fn extracts_bare_object() {
        let msg = r#"Got it: {"email": "ada@example.com"}"#;
        let map = extract_structured(msg).unwrap();
        assert_eq!(map.get("email"), Some(&json!("ada@example.com")));
    }

    #[test]
    fn plain_text_yields_none() {
        assert!(extract_structured("What is your name?").is_none());
        assert!(extract_structured("} backwards {").is_none());
    }

    #[test]
    fn malformed_json_yields_none() {
        assert!(extract_structured("{not: json}").is_none());
    }
}
