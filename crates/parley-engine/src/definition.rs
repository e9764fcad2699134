//! Declarative JSON route definitions, compiled into a [`Route`].
//!
//! ```json
//! {
//!   "id": "signup",
//!   "title": "Sign up",
//!   "required_fields": ["name", "email"],
//!   "steps": [
//!     { "id": "ask_name", "collect": ["name"], "transitions": [{ "to": "ask_email" }] },
//!     { "id": "ask_email", "collect": ["email"], "requires": ["name"],
//!       "skip_if": "context.channel=sms", "finalize": "crm_sync",
//!       "transitions": [{ "to": "end_route" }] }
//!   ]
//! }
//! ```
//!
//! Hooks in a definition are tool names. Callable hooks and closure skip
//! predicates need [`crate::RouteBuilder`].

use std::path::Path;

use parley_types::Result;
use serde::{Deserialize, Serialize};

use crate::condition::parse_condition;
use crate::hooks::HookRef;
use crate::route::{Route, SkipIf, Step, Term};
use crate::schema::Schema;
use crate::validation::{raise_on_errors, Diagnostic, Severity};

/// Transition target that ends the route.
pub const END_ROUTE: &str = "end_route";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDefinition {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub optional_fields: Vec<String>,
    /// Defaults to the first step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    #[serde(default)]
    pub guidelines: Vec<String>,
    #[serde(default)]
    pub terms: Vec<Term>,
    #[serde(default)]
    pub tools: Vec<String>,
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub collect: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepare: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize: Option<String>,
    #[serde(default)]
    pub transitions: Vec<TransitionDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDefinition {
    /// A step id, or [`END_ROUTE`].
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Checks that only make sense before compilation: condition syntax and
/// reserved step ids.
pub fn validate_definition(def: &RouteDefinition) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    for step in &def.steps {
        if step.id == END_ROUTE {
            out.push(Diagnostic {
                rule: "reserved_step_id".into(),
                severity: Severity::Error,
                message: format!("Step id '{END_ROUTE}' is reserved for the end-of-route marker"),
                step_id: Some(step.id.clone()),
                fix: Some("Rename the step".into()),
            });
        }
        if let Some(cond) = &step.skip_if {
            if let Err(e) = parse_condition(cond) {
                out.push(Diagnostic {
                    rule: "skip_condition_syntax".into(),
                    severity: Severity::Error,
                    message: format!("Step '{}' has an invalid skip condition '{cond}': {e}", step.id),
                    step_id: Some(step.id.clone()),
                    fix: Some("Fix the condition syntax".into()),
                });
            }
        }
    }
    out
}

impl Route {
    /// Compile a definition. Fails on any error-severity diagnostic, from
    /// the definition checks or the route lint rules.
    pub fn from_definition(def: RouteDefinition) -> Result<Route> {
        raise_on_errors(validate_definition(&def))?;

        let mut builder = Route::builder(def.id, def.title)
            .required_fields(def.required_fields)
            .optional_fields(def.optional_fields);
        if let Some(description) = def.description {
            builder = builder.description(description);
        }
        if let Some(initial) = def.initial_step {
            builder = builder.initial_step(initial);
        }
        if let Some(schema) = def.schema {
            builder = builder.schema(schema);
        }
        for guideline in def.guidelines {
            builder = builder.guideline(guideline);
        }
        for term in def.terms {
            builder = builder.term(term.name, term.description);
        }
        for tool in def.tools {
            builder = builder.tool(tool);
        }

        for step_def in def.steps {
            let mut step = Step::new(step_def.id.clone())
                .with_collect(step_def.collect)
                .with_requires(step_def.requires);
            step.description = step_def.description;
            step.prompt = step_def.prompt;
            if let Some(cond) = &step_def.skip_if {
                step = step.with_skip_if(SkipIf::condition(cond)?);
            }
            if let Some(name) = step_def.prepare {
                step = step.with_prepare(HookRef::Named(name));
            }
            if let Some(name) = step_def.finalize {
                step = step.with_finalize(HookRef::Named(name));
            }
            builder = builder.step(step);

            for t in step_def.transitions {
                builder = match (t.to.as_str(), t.label) {
                    (END_ROUTE, _) => builder.end_route(step_def.id.clone()),
                    (to, Some(label)) => builder.labeled_transition(step_def.id.clone(), to, label),
                    (to, None) => builder.transition(step_def.id.clone(), to),
                };
            }
        }

        builder.build()
    }

    pub fn from_json(raw: &str) -> Result<Route> {
        let def: RouteDefinition = serde_json::from_str(raw)?;
        Route::from_definition(def)
    }

    /// Load and compile a route definition file.
    pub fn load(path: impl AsRef<Path>) -> Result<Route> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Route::from_json(&raw)
    }
}
