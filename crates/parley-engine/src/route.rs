use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parley_types::{FieldMap, ParleyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::{evaluate_condition, parse_condition, ConditionExpr};
use crate::hooks::HookRef;
use crate::schema::Schema;
use crate::validation::validate_or_raise;

// ---------------------------------------------------------------------------
// Skip predicates
// ---------------------------------------------------------------------------

/// What a skip predicate gets to look at: collected data plus the turn context.
#[derive(Debug, Clone, Copy)]
pub struct SkipSnapshot<'a> {
    pub data: &'a FieldMap,
    pub context: &'a HashMap<String, Value>,
}

impl<'a> SkipSnapshot<'a> {
    pub fn new(data: &'a FieldMap, context: &'a HashMap<String, Value>) -> Self {
        Self { data, context }
    }

    /// Resolve `context.<key>`, `data.<key>` or a bare data key.
    pub fn resolve(&self, key: &str) -> Option<Value> {
        if let Some(rest) = key.strip_prefix("context.") {
            return self.context.get(rest).cloned();
        }
        let key = key.strip_prefix("data.").unwrap_or(key);
        self.data.get(key).cloned()
    }
}

pub type SkipFn = dyn Fn(&SkipSnapshot<'_>) -> Result<bool> + Send + Sync;

/// A step's skip predicate: either a declarative condition or a closure.
#[derive(Clone)]
pub enum SkipIf {
    Condition { source: String, expr: ConditionExpr },
    Custom(Arc<SkipFn>),
}

impl SkipIf {
    /// Parse a declarative condition (see [`crate::condition`]).
    pub fn condition(source: &str) -> Result<Self> {
        Ok(SkipIf::Condition {
            source: source.to_string(),
            expr: parse_condition(source)?,
        })
    }

    pub fn custom(f: impl Fn(&SkipSnapshot<'_>) -> Result<bool> + Send + Sync + 'static) -> Self {
        SkipIf::Custom(Arc::new(f))
    }

    /// Evaluate the predicate. A panicking closure is reported as an error.
    pub fn evaluate(&self, snapshot: &SkipSnapshot<'_>) -> Result<bool> {
        match self {
            SkipIf::Condition { expr, .. } => {
                evaluate_condition(expr, &|key: &str| snapshot.resolve(key))
            }
            SkipIf::Custom(f) => catch_unwind(AssertUnwindSafe(|| f(snapshot)))
                .unwrap_or_else(|_| Err(ParleyError::Other("skip predicate panicked".into()))),
        }
    }
}

impl fmt::Debug for SkipIf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipIf::Condition { source, .. } => f.debug_tuple("Condition").field(source).finish(),
            SkipIf::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A node in a route. Immutable once the route is built.
#[derive(Debug, Clone)]
pub struct Step {
    pub id: String,
    pub description: Option<String>,
    pub prompt: Option<String>,
    /// Fields this step tries to extract. Satisfied when any one is present.
    pub collect: Vec<String>,
    /// Fields that must all be present before the step can run.
    pub requires: Vec<String>,
    pub skip_if: Option<SkipIf>,
    pub prepare: Option<HookRef>,
    pub finalize: Option<HookRef>,
}

impl Step {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            prompt: None,
            collect: Vec::new(),
            requires: Vec::new(),
            skip_if: None,
            prepare: None,
            finalize: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_collect<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collect = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_requires<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_skip_if(mut self, skip_if: SkipIf) -> Self {
        self.skip_if = Some(skip_if);
        self
    }

    pub fn with_prepare(mut self, hook: HookRef) -> Self {
        self.prepare = Some(hook);
        self
    }

    pub fn with_finalize(mut self, hook: HookRef) -> Self {
        self.finalize = Some(hook);
        self
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionTarget {
    Step(String),
    /// Terminal marker: reaching it ends the route.
    EndRoute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: String,
    pub target: TransitionTarget,
    pub label: Option<String>,
}

/// A glossary entry surfaced to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub name: String,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// An identified graph of steps.
///
/// Steps live in an arena; transitions are kept in an adjacency map keyed by
/// the source step id, in declaration order.
#[derive(Debug, Clone)]
pub struct Route {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub required_fields: Vec<String>,
    pub optional_fields: Vec<String>,
    pub schema: Option<Schema>,
    initial_step: String,
    steps: Vec<Step>,
    index: HashMap<String, usize>,
    transitions: HashMap<String, Vec<Transition>>,
    guidelines: Vec<String>,
    terms: Vec<Term>,
    tools: Vec<String>,
}

impl Route {
    pub fn builder(id: impl Into<String>, title: impl Into<String>) -> RouteBuilder {
        RouteBuilder::new(id, title)
    }

    pub fn initial_step_id(&self) -> &str {
        &self.initial_step
    }

    pub fn initial_step(&self) -> Option<&Step> {
        self.step(&self.initial_step)
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    /// Steps in declaration order, duplicates included.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn transitions(&self, step_id: &str) -> &[Transition] {
        self.transitions
            .get(step_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first_transition(&self, step_id: &str) -> Option<&Transition> {
        self.transitions(step_id).first()
    }

    /// Transitions leaving declared steps, in step declaration order.
    pub fn all_transitions(&self) -> impl Iterator<Item = &Transition> {
        self.steps
            .iter()
            .enumerate()
            .filter(move |(i, s)| self.index.get(&s.id) == Some(i))
            .flat_map(move |(_, s)| self.transitions(&s.id))
    }

    /// Ids that have outgoing transitions but are not steps of this route.
    pub fn orphan_transition_sources(&self) -> Vec<&String> {
        let mut orphans: Vec<&String> = self
            .transitions
            .keys()
            .filter(|from| !self.index.contains_key(*from))
            .collect();
        orphans.sort();
        orphans
    }

    pub fn guidelines(&self) -> &[String] {
        &self.guidelines
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    pub fn add_guideline(&mut self, guideline: impl Into<String>) {
        self.guidelines.push(guideline.into());
    }

    pub fn add_term(&mut self, name: impl Into<String>, description: impl Into<String>) {
        self.terms.push(Term {
            name: name.into(),
            description: description.into(),
        });
    }

    pub fn add_tool(&mut self, tool: impl Into<String>) {
        let tool = tool.into();
        if !self.tools.contains(&tool) {
            self.tools.push(tool);
        }
    }

    /// Every field this route declares, via its field lists or its schema.
    pub fn declares_field(&self, field: &str) -> bool {
        self.required_fields.iter().any(|f| f == field)
            || self.optional_fields.iter().any(|f| f == field)
            || self
                .schema
                .as_ref()
                .is_some_and(|s| s.property(field).is_some())
    }
}

// ---------------------------------------------------------------------------
// RouteBuilder
// ---------------------------------------------------------------------------

pub struct RouteBuilder {
    id: String,
    title: String,
    description: Option<String>,
    required_fields: Vec<String>,
    optional_fields: Vec<String>,
    schema: Option<Schema>,
    initial_step: Option<String>,
    steps: Vec<Step>,
    transitions: Vec<Transition>,
    guidelines: Vec<String>,
    terms: Vec<Term>,
    tools: Vec<String>,
}

impl RouteBuilder {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            required_fields: Vec::new(),
            optional_fields: Vec::new(),
            schema: None,
            initial_step: None,
            steps: Vec::new(),
            transitions: Vec::new(),
            guidelines: Vec::new(),
            terms: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn optional_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn guideline(mut self, guideline: impl Into<String>) -> Self {
        self.guidelines.push(guideline.into());
        self
    }

    pub fn term(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.terms.push(Term {
            name: name.into(),
            description: description.into(),
        });
        self
    }

    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.tools.push(tool.into());
        self
    }

    /// Set the entry step. Defaults to the first step added.
    pub fn initial_step(mut self, step_id: impl Into<String>) -> Self {
        self.initial_step = Some(step_id.into());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn transition(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        let to = to.into();
        self.push_transition(from.into(), TransitionTarget::Step(to), None)
    }

    pub fn labeled_transition(
        self,
        from: impl Into<String>,
        to: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        let to = to.into();
        self.push_transition(from.into(), TransitionTarget::Step(to), Some(label.into()))
    }

    /// Route `from` to the end-of-route marker.
    pub fn end_route(self, from: impl Into<String>) -> Self {
        self.push_transition(from.into(), TransitionTarget::EndRoute, None)
    }

    /// Link the given step ids one after the other.
    pub fn chain<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        for pair in ids.windows(2) {
            self = self.transition(pair[0].clone(), pair[1].clone());
        }
        self
    }

    fn push_transition(
        mut self,
        from: String,
        target: TransitionTarget,
        label: Option<String>,
    ) -> Self {
        self.transitions.push(Transition {
            from,
            target,
            label,
        });
        self
    }

    /// Assemble the route and run the lint rules; any error-severity
    /// diagnostic fails the build.
    pub fn build(self) -> Result<Route> {
        let initial_step = match self.initial_step {
            Some(id) => id,
            None => self
                .steps
                .first()
                .map(|s| s.id.clone())
                .ok_or_else(|| {
                    ParleyError::RouteValidation(format!("route '{}' has no steps", self.id))
                })?,
        };

        let mut index = HashMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            index.entry(step.id.clone()).or_insert(i);
        }

        let mut transitions: HashMap<String, Vec<Transition>> = HashMap::new();
        for t in self.transitions {
            transitions.entry(t.from.clone()).or_default().push(t);
        }

        let mut tools = Vec::new();
        for tool in self.tools {
            if !tools.contains(&tool) {
                tools.push(tool);
            }
        }

        let route = Route {
            id: self.id,
            title: self.title,
            description: self.description,
            required_fields: self.required_fields,
            optional_fields: self.optional_fields,
            schema: self.schema,
            initial_step,
            steps: self.steps,
            index,
            transitions,
            guidelines: self.guidelines,
            terms: self.terms,
            tools,
        };

        for diag in validate_or_raise(&route)? {
            tracing::warn!(route = %route.id, rule = %diag.rule, "{}", diag.message);
        }
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn linear() -> Route {
        Route::builder("signup", "Sign up")
            .required_fields(["name", "email"])
            .step(Step::new("ask_name").with_collect(["name"]))
            .step(Step::new("ask_email").with_collect(["email"]).with_requires(["name"]))
            .chain(["ask_name", "ask_email"])
            .end_route("ask_email")
            .build()
            .unwrap()
    }

    #[test]
    fn builder_defaults_initial_to_first_step() {
        let route = linear();
        assert_eq!(route.initial_step_id(), "ask_name");
        assert_eq!(route.initial_step().unwrap().collect, vec!["name"]);
    }

    #[test]
    fn adjacency_preserves_declaration_order() {
        let route = Route::builder("r", "R")
            .step(Step::new("a"))
            .step(Step::new("b"))
            .step(Step::new("c"))
            .labeled_transition("a", "c", "first")
            .labeled_transition("a", "b", "second")
            .build()
            .unwrap();

        let out = route.transitions("a");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].target, TransitionTarget::Step("c".into()));
        assert_eq!(route.first_transition("a").unwrap().label.as_deref(), Some("first"));
        assert!(route.transitions("c").is_empty());
    }

    #[test]
    fn end_route_marker_is_a_transition_target() {
        let route = linear();
        assert_eq!(
            route.first_transition("ask_email").unwrap().target,
            TransitionTarget::EndRoute
        );
        assert_eq!(route.all_transitions().count(), 2);
    }

    #[test]
    fn empty_route_fails_to_build() {
        let err = Route::builder("r", "R").build().unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn unknown_transition_target_fails_to_build() {
        let err = Route::builder("r", "R")
            .step(Step::new("a"))
            .transition("a", "ghost")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn dynamic_guidelines_terms_tools() {
        let mut route = linear();
        route.add_guideline("Be brief");
        route.add_term("SKU", "Stock keeping unit");
        route.add_tool("lookup");
        route.add_tool("lookup");
        assert_eq!(route.guidelines(), ["Be brief".to_string()]);
        assert_eq!(route.terms()[0].name, "SKU");
        assert_eq!(route.tools(), ["lookup".to_string()]);
    }

    #[test]
    fn declares_field_checks_lists_and_schema() {
        let route = Route::builder("r", "R")
            .optional_fields(["nickname"])
            .schema(Schema::object([("age", crate::schema::PropertySchema::typed(crate::schema::SchemaType::Number))]))
            .step(Step::new("a"))
            .build()
            .unwrap();
        assert!(route.declares_field("nickname"));
        assert!(route.declares_field("age"));
        assert!(!route.declares_field("email"));
    }

    #[test]
    fn skip_condition_resolves_data_and_context() {
        let skip = SkipIf::condition("plan=pro && context.channel=web").unwrap();
        let mut data = FieldMap::new();
        data.insert("plan".into(), json!("pro"));
        let mut ctx = HashMap::new();
        ctx.insert("channel".to_string(), json!("web"));
        assert!(skip.evaluate(&SkipSnapshot::new(&data, &ctx)).unwrap());

        ctx.insert("channel".to_string(), json!("sms"));
        assert!(!skip.evaluate(&SkipSnapshot::new(&data, &ctx)).unwrap());
    }

    #[test]
    fn panicking_custom_skip_is_an_error() {
        let skip = SkipIf::custom(|_| panic!("boom"));
        let data = FieldMap::new();
        let ctx = HashMap::new();
        assert!(skip.evaluate(&SkipSnapshot::new(&data, &ctx)).is_err());
    }
}
