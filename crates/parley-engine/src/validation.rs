//! Route validation: lint rules and diagnostics.
//!
//! Call [`validate`] for advisory diagnostics or [`validate_or_raise`] to
//! fail on any `Error`-severity issue. [`validate_hooks`] checks named hook
//! references against a tool registry.

use std::collections::{HashMap, HashSet, VecDeque};

use parley_tools::ToolRegistry;
use parley_types::{ParleyError, Result};

use crate::hooks::HookRef;
use crate::route::{Route, TransitionTarget};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub step_id: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, route: &Route) -> Vec<Diagnostic>;
}

/// Step ids reachable from `from` over every transition.
fn successors<'a>(route: &'a Route, from: &str) -> impl Iterator<Item = &'a str> + 'a {
    route.transitions(from).iter().filter_map(|t| match &t.target {
        TransitionTarget::Step(id) => Some(id.as_str()),
        TransitionTarget::EndRoute => None,
    })
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct InitialStepExistsRule;
impl LintRule for InitialStepExistsRule {
    fn name(&self) -> &str { "initial_step_exists" }
    fn apply(&self, route: &Route) -> Vec<Diagnostic> {
        if route.initial_step().is_some() {
            return vec![];
        }
        vec![Diagnostic {
            rule: self.name().into(),
            severity: Severity::Error,
            message: format!(
                "Route '{}' starts at '{}', which is not one of its steps",
                route.id,
                route.initial_step_id()
            ),
            step_id: Some(route.initial_step_id().to_string()),
            fix: Some("Point the initial step at a declared step".into()),
        }]
    }
}

struct TransitionTargetExistsRule;
impl LintRule for TransitionTargetExistsRule {
    fn name(&self) -> &str { "transition_target_exists" }
    fn apply(&self, route: &Route) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        for t in route.all_transitions() {
            if let TransitionTarget::Step(to) = &t.target {
                if route.step(to).is_none() {
                    out.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Error,
                        message: format!("Transition {} -> {} references unknown step '{}'", t.from, to, to),
                        step_id: Some(t.from.clone()),
                        fix: Some(format!("Add step '{to}' or fix the transition target")),
                    });
                }
            }
        }
        out
    }
}

struct TransitionSourceExistsRule;
impl LintRule for TransitionSourceExistsRule {
    fn name(&self) -> &str { "transition_source_exists" }
    fn apply(&self, route: &Route) -> Vec<Diagnostic> {
        route
            .orphan_transition_sources()
            .into_iter()
            .map(|from| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Transition leaves unknown step '{from}'"),
                step_id: Some(from.clone()),
                fix: Some(format!("Add step '{from}' or remove its transitions")),
            })
            .collect()
    }
}

struct UniqueStepIdsRule;
impl LintRule for UniqueStepIdsRule {
    fn name(&self) -> &str { "unique_step_ids" }
    fn apply(&self, route: &Route) -> Vec<Diagnostic> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for step in route.steps() {
            *counts.entry(step.id.as_str()).or_default() += 1;
        }
        let mut dupes: Vec<_> = counts.into_iter().filter(|(_, n)| *n > 1).collect();
        dupes.sort();
        dupes
            .into_iter()
            .map(|(id, n)| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Step id '{id}' is declared {n} times"),
                step_id: Some(id.to_string()),
                fix: Some("Rename the duplicate steps".into()),
            })
            .collect()
    }
}

struct ReachabilityRule;
impl LintRule for ReachabilityRule {
    fn name(&self) -> &str { "reachability" }
    fn apply(&self, route: &Route) -> Vec<Diagnostic> {
        let Some(start) = route.initial_step() else {
            return vec![]; // InitialStepExistsRule reports this
        };

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(start.id.as_str());
        queue.push_back(start.id.as_str());
        while let Some(current) = queue.pop_front() {
            for next in successors(route, current) {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        route
            .steps()
            .iter()
            .filter(|s| !visited.contains(s.id.as_str()))
            .map(|s| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!("Step '{}' is not reachable from the initial step", s.id),
                step_id: Some(s.id.clone()),
                fix: Some(format!("Add a transition leading to '{}' or remove it", s.id)),
            })
            .collect()
    }
}

struct TurnCycleRule;
impl LintRule for TurnCycleRule {
    fn name(&self) -> &str { "turn_cycle" }
    fn apply(&self, route: &Route) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        let mut reported = HashSet::new();
        for step in route.steps() {
            if !reported.insert(step.id.as_str()) || !reaches(route, &step.id, &step.id) {
                continue;
            }
            out.push(Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!(
                    "Step '{}' can transition back to itself; a turn that walks this loop fails",
                    step.id
                ),
                step_id: Some(step.id.clone()),
                fix: Some("Make sure a step on the loop needs input before it repeats".into()),
            });
        }
        out
    }
}

fn reaches(route: &Route, from: &str, target: &str) -> bool {
    let mut visited = HashSet::new();
    let mut queue: VecDeque<&str> = successors(route, from).collect();
    while let Some(current) = queue.pop_front() {
        if current == target {
            return true;
        }
        if visited.insert(current) {
            queue.extend(successors(route, current));
        }
    }
    false
}

struct DeclaredFieldsRule;
impl LintRule for DeclaredFieldsRule {
    fn name(&self) -> &str { "declared_fields" }
    fn apply(&self, route: &Route) -> Vec<Diagnostic> {
        let declares_anything = !route.required_fields.is_empty()
            || !route.optional_fields.is_empty()
            || route.schema.as_ref().is_some_and(|s| s.properties.is_some());
        if !declares_anything {
            return vec![];
        }

        let mut out = Vec::new();
        for step in route.steps() {
            for field in step.collect.iter().chain(&step.requires) {
                if !route.declares_field(field) {
                    out.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Warning,
                        message: format!("Step '{}' uses undeclared field '{field}'", step.id),
                        step_id: Some(step.id.clone()),
                        fix: Some(format!("Declare '{field}' in the route's fields or schema")),
                    });
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return every diagnostic.
pub fn validate(route: &Route) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(InitialStepExistsRule),
        Box::new(TransitionTargetExistsRule),
        Box::new(TransitionSourceExistsRule),
        Box::new(UniqueStepIdsRule),
        Box::new(ReachabilityRule),
        Box::new(TurnCycleRule),
        Box::new(DeclaredFieldsRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(route));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(route: &Route) -> Result<Vec<Diagnostic>> {
    raise_on_errors(validate(route))
}

pub(crate) fn raise_on_errors(diagnostics: Vec<Diagnostic>) -> Result<Vec<Diagnostic>> {
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(ParleyError::RouteValidation(errors.join("; ")));
    }
    Ok(diagnostics)
}

/// Report named hooks whose tool is not in `registry`.
pub fn validate_hooks(route: &Route, registry: &ToolRegistry) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    for step in route.steps() {
        for (phase, hook) in [("prepare", &step.prepare), ("finalize", &step.finalize)] {
            if let Some(HookRef::Named(name)) = hook {
                if !registry.contains(name) {
                    out.push(Diagnostic {
                        rule: "hook_tool_registered".into(),
                        severity: Severity::Error,
                        message: format!("Step '{}' {phase} hook names unregistered tool '{name}'", step.id),
                        step_id: Some(step.id.clone()),
                        fix: Some(format!("Register a tool named '{name}'")),
                    });
                }
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
