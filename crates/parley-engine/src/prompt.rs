//! Assemble the generation request for a batch.

use std::fmt::Write as _;

use parley_llm::{GenerationRequest, Message};
use parley_types::{FieldMap, SessionState};
use serde_json::{json, Map, Value};

use crate::batch::BatchResult;
use crate::route::{Route, Step};

/// Expand `${field}` references from session data.
///
/// String values are inserted verbatim, anything else as JSON text.
/// References to absent fields are left as-is. The template is scanned once
/// left to right, so inserted values are never expanded themselves.
pub fn expand_variables(template: &str, data: &FieldMap) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &after[..end];
        match data.get(key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Build the request the generator sees for this batch.
pub fn build_request(
    route: &Route,
    batch: &BatchResult<'_>,
    session: &SessionState,
    history_window: usize,
) -> GenerationRequest {
    let collect_fields = batch.collect_fields();
    let next = batch.stopped_at.as_deref().and_then(|id| route.step(id));
    let start = session.history.len().saturating_sub(history_window);

    GenerationRequest {
        system_prompt: system_prompt(route, &batch.steps, next, &session.data, &collect_fields),
        messages: session.history[start..].iter().map(Message::from).collect(),
        response_schema: response_schema(route, &collect_fields),
        collect_fields,
    }
}

/// The system prompt: route header, guidelines, terms, known data, each
/// batch step in order, the step that will need the user next, and the
/// fields to extract.
pub fn system_prompt(
    route: &Route,
    steps: &[&Step],
    next: Option<&Step>,
    data: &FieldMap,
    collect_fields: &[String],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", route.title);
    if let Some(desc) = &route.description {
        let _ = writeln!(out, "{}", expand_variables(desc, data));
    }

    if !route.guidelines().is_empty() {
        out.push_str("\n## Guidelines\n");
        for g in route.guidelines() {
            let _ = writeln!(out, "- {}", expand_variables(g, data));
        }
    }

    if !route.terms().is_empty() {
        out.push_str("\n## Terms\n");
        for t in route.terms() {
            let _ = writeln!(out, "- {}: {}", t.name, t.description);
        }
    }

    if !data.is_empty() {
        out.push_str("\n## Known\n");
        let mut keys: Vec<&String> = data.keys().collect();
        keys.sort();
        for key in keys {
            let _ = writeln!(out, "- {key}: {}", data[key]);
        }
    }

    if !steps.is_empty() {
        out.push_str("\n## Steps\n");
        for step in steps {
            let _ = writeln!(out, "### {}", step.id);
            write_step_text(&mut out, step, data);
        }
    }

    if let Some(step) = next {
        let _ = writeln!(out, "\n## Next\nFinish by asking the user for what step '{}' needs.", step.id);
        write_step_text(&mut out, step, data);
    }

    if !collect_fields.is_empty() {
        let _ = writeln!(
            out,
            "\n## Extract\nReturn a JSON object with any of these fields the user provided: {}",
            collect_fields.join(", ")
        );
    }
    out
}

fn write_step_text(out: &mut String, step: &Step, data: &FieldMap) {
    if let Some(desc) = &step.description {
        let _ = writeln!(out, "{}", expand_variables(desc, data));
    }
    if let Some(prompt) = &step.prompt {
        let _ = writeln!(out, "{}", expand_variables(prompt, data));
    }
}

/// Object schema over `fields`, typed from the route schema when it
/// declares them. `None` when there is nothing to collect.
pub fn response_schema(route: &Route, fields: &[String]) -> Option<Value> {
    if fields.is_empty() {
        return None;
    }
    let properties: Map<String, Value> = fields
        .iter()
        .map(|f| {
            let prop = route
                .schema
                .as_ref()
                .and_then(|s| s.property(f))
                .map(|p| p.to_json_schema())
                .unwrap_or_else(|| json!({"type": "string"}));
            (f.clone(), prop)
        })
        .collect();
    Some(json!({
        "type": "object",
        "properties": properties,
    }))
}
