//! Batch determination: which steps can run in the current turn.
//!
//! Walks the route from the session's position along first transitions,
//! skipping steps whose predicate holds and stopping at the first step that
//! needs input. A step is never visited twice in one walk.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parley_types::{FieldMap, ParleyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{BatchEvent, EventSink};
use crate::needs_input::{missing_requirements, needs_input};
use crate::route::{Route, SkipSnapshot, Step, TransitionTarget};

/// Why the determiner stopped walking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStop {
    NeedsInput,
    EndRoute,
    RouteComplete,
}

/// Why a turn ended, as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppedReason {
    NeedsInput,
    EndRoute,
    RouteComplete,
    PrepareError,
    LlmError,
    ValidationError,
}

impl StoppedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StoppedReason::NeedsInput => "needs_input",
            StoppedReason::EndRoute => "end_route",
            StoppedReason::RouteComplete => "route_complete",
            StoppedReason::PrepareError => "prepare_error",
            StoppedReason::LlmError => "llm_error",
            StoppedReason::ValidationError => "validation_error",
        }
    }

    /// `true` for the two reasons that abort a turn without changing the session.
    pub fn is_fatal(self) -> bool {
        matches!(self, StoppedReason::PrepareError | StoppedReason::LlmError)
    }

    /// `true` when the route has nothing left to run.
    pub fn is_route_finished(self) -> bool {
        matches!(self, StoppedReason::EndRoute | StoppedReason::RouteComplete)
    }
}

impl From<BatchStop> for StoppedReason {
    fn from(stop: BatchStop) -> Self {
        match stop {
            BatchStop::NeedsInput => StoppedReason::NeedsInput,
            BatchStop::EndRoute => StoppedReason::EndRoute,
            BatchStop::RouteComplete => StoppedReason::RouteComplete,
        }
    }
}

impl fmt::Display for StoppedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Steps selected for this turn, in walk order.
#[derive(Debug, Clone)]
pub struct BatchResult<'a> {
    pub steps: Vec<&'a Step>,
    pub stop: BatchStop,
    /// Set when `stop` is [`BatchStop::NeedsInput`].
    pub stopped_at: Option<String>,
    pub skipped: Vec<String>,
}

impl BatchResult<'_> {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_ids(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }

    /// Union of every batch step's collect fields, first occurrence wins.
    pub fn collect_fields(&self) -> Vec<String> {
        batch_collect_fields(&self.steps)
    }
}

pub(crate) fn batch_collect_fields(steps: &[&Step]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut fields = Vec::new();
    for step in steps {
        for field in &step.collect {
            if seen.insert(field.as_str()) {
                fields.push(field.clone());
            }
        }
    }
    fields
}

/// Determine the batch for one turn.
///
/// Starts at `current_step`, or the route's initial step when `None`.
/// Returns `Err` only for configuration faults: an unknown step id or a walk
/// that comes back to a step already visited this turn.
pub fn determine_batch<'a>(
    route: &'a Route,
    current_step: Option<&str>,
    data: &FieldMap,
    context: &HashMap<String, Value>,
    events: &EventSink,
) -> Result<BatchResult<'a>> {
    let start = current_step.unwrap_or_else(|| route.initial_step_id());
    tracing::debug!(route = %route.id, start = %start, "Determining batch");
    events.emit(BatchEvent::BatchStart {
        step_id: Some(start.to_string()),
        reason: format!("walking route '{}'", route.id),
        batch_size: 0,
    });

    let snapshot = SkipSnapshot::new(data, context);
    let mut visited: HashSet<&str> = HashSet::new();
    let mut steps: Vec<&'a Step> = Vec::new();
    let mut skipped = Vec::new();
    let mut cursor = TransitionTarget::Step(start.to_string());

    loop {
        let step_id = match &cursor {
            TransitionTarget::EndRoute => {
                return Ok(finish(events, steps, skipped, BatchStop::EndRoute, None, "end of route reached"));
            }
            TransitionTarget::Step(id) => id.clone(),
        };

        let step = route.step(&step_id).ok_or_else(|| ParleyError::StepNotFound {
            route: route.id.clone(),
            step: step_id.clone(),
        })?;
        if !visited.insert(step.id.as_str()) {
            return Err(ParleyError::CycleDetected {
                route: route.id.clone(),
                step: step.id.clone(),
            });
        }

        if should_skip(step, &snapshot) {
            tracing::debug!(step = %step.id, "Skipping step");
            skipped.push(step.id.clone());
            events.emit(BatchEvent::StepSkipped {
                step_id: step.id.clone(),
                reason: "skip condition holds".into(),
                batch_size: steps.len(),
            });
        } else if needs_input(step, data) {
            let missing = missing_requirements(step, data);
            let reason = if missing.is_empty() {
                format!("none of [{}] collected yet", step.collect.join(", "))
            } else {
                format!("missing required [{}]", missing.join(", "))
            };
            tracing::debug!(step = %step.id, %reason, "Step needs input");
            let stop_at = step.id.clone();
            return Ok(finish(events, steps, skipped, BatchStop::NeedsInput, Some(stop_at), &reason));
        } else {
            steps.push(step);
            tracing::debug!(step = %step.id, batch_size = steps.len(), "Step included");
            events.emit(BatchEvent::StepIncluded {
                step_id: step.id.clone(),
                reason: "inputs available".into(),
                batch_size: steps.len(),
            });
        }

        match route.first_transition(&step.id) {
            Some(t) => cursor = t.target.clone(),
            None => {
                return Ok(finish(events, steps, skipped, BatchStop::RouteComplete, None, "no outgoing transitions"));
            }
        }
    }
}

fn finish<'a>(
    events: &EventSink,
    steps: Vec<&'a Step>,
    skipped: Vec<String>,
    stop: BatchStop,
    stopped_at: Option<String>,
    reason: &str,
) -> BatchResult<'a> {
    events.emit(BatchEvent::BatchStop {
        step_id: stopped_at.clone(),
        reason: format!("{}: {reason}", StoppedReason::from(stop)),
        batch_size: steps.len(),
    });
    BatchResult {
        steps,
        stop,
        stopped_at,
        skipped,
    }
}

/// Evaluation failures never skip a step.
fn should_skip(step: &Step, snapshot: &SkipSnapshot<'_>) -> bool {
    let Some(skip_if) = &step.skip_if else {
        return false;
    };
    match skip_if.evaluate(snapshot) {
        Ok(skip) => skip,
        Err(e) => {
            tracing::warn!(step = %step.id, error = %e, "Skip predicate failed; treating step as not skippable");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{SkipIf, Step};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn data(pairs: &[(&str, Value)]) -> FieldMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn signup() -> Route {
        Route::builder("signup", "Sign up")
            .step(Step::new("greet"))
            .step(Step::new("ask_name").with_collect(["name"]))
            .step(Step::new("ask_email").with_collect(["email"]).with_requires(["name"]))
            .chain(["greet", "ask_name", "ask_email"])
            .build()
            .unwrap()
    }

    fn run<'a>(route: &'a Route, start: Option<&str>, d: &FieldMap) -> BatchResult<'a> {
        determine_batch(route, start, d, &HashMap::new(), &EventSink::new()).unwrap()
    }

    #[test]
    fn stops_at_first_step_needing_input() {
        let route = signup();
        let batch = run(&route, None, &FieldMap::new());
        assert_eq!(batch.step_ids(), vec!["greet"]);
        assert_eq!(batch.stop, BatchStop::NeedsInput);
        assert_eq!(batch.stopped_at.as_deref(), Some("ask_name"));
    }

    #[test]
    fn walks_to_route_complete_when_everything_is_present() {
        let route = signup();
        let d = data(&[("name", json!("Ada")), ("email", json!("ada@example.com"))]);
        let batch = run(&route, None, &d);
        assert_eq!(batch.step_ids(), vec!["greet", "ask_name", "ask_email"]);
        assert_eq!(batch.stop, BatchStop::RouteComplete);
        assert!(batch.stopped_at.is_none());
        assert_eq!(batch.collect_fields(), vec!["name", "email"]);
    }

    #[test]
    fn starts_from_current_step() {
        let route = signup();
        let d = data(&[("name", json!("Ada"))]);
        let batch = run(&route, Some("ask_name"), &d);
        assert_eq!(batch.step_ids(), vec!["ask_name"]);
        assert_eq!(batch.stopped_at.as_deref(), Some("ask_email"));
    }

    #[test]
    fn end_route_marker_stops_walk() {
        let route = Route::builder("r", "R")
            .step(Step::new("a"))
            .step(Step::new("b"))
            .end_route("a")
            .transition("a", "b")
            .build()
            .unwrap();
        let batch = run(&route, None, &FieldMap::new());
        assert_eq!(batch.step_ids(), vec!["a"]);
        assert_eq!(batch.stop, BatchStop::EndRoute);
    }

    #[test]
    fn skipped_steps_are_not_in_batch() {
        let route = Route::builder("r", "R")
            .step(Step::new("a").with_collect(["plan"]))
            .step(
                Step::new("upsell")
                    .with_collect(["addon"])
                    .with_skip_if(SkipIf::condition("plan=pro").unwrap()),
            )
            .step(Step::new("done"))
            .chain(["a", "upsell", "done"])
            .build()
            .unwrap();
        let batch = run(&route, None, &data(&[("plan", json!("pro"))]));
        assert_eq!(batch.step_ids(), vec!["a", "done"]);
        assert_eq!(batch.skipped, vec!["upsell"]);
        assert_eq!(batch.stop, BatchStop::RouteComplete);
    }

    #[test]
    fn failing_skip_predicate_is_not_skippable() {
        let route = Route::builder("r", "R")
            .step(
                Step::new("ask_name")
                    .with_collect(["name"])
                    .with_skip_if(SkipIf::custom(|_| Err(ParleyError::Other("boom".into())))),
            )
            .build()
            .unwrap();
        let batch = run(&route, None, &FieldMap::new());
        assert!(batch.is_empty());
        assert_eq!(batch.stop, BatchStop::NeedsInput);
        assert_eq!(batch.stopped_at.as_deref(), Some("ask_name"));
    }

    #[test]
    fn ordering_error_in_condition_is_not_skippable() {
        let route = Route::builder("r", "R")
            .step(
                Step::new("ask_age")
                    .with_collect(["age"])
                    .with_skip_if(SkipIf::condition("age > 17").unwrap()),
            )
            .build()
            .unwrap();
        let batch = run(&route, None, &FieldMap::new());
        assert_eq!(batch.stop, BatchStop::NeedsInput);
    }

    #[test]
    fn skip_condition_sees_context() {
        let route = Route::builder("r", "R")
            .step(
                Step::new("sms_only")
                    .with_collect(["phone"])
                    .with_skip_if(SkipIf::condition("context.channel != sms").unwrap()),
            )
            .build()
            .unwrap();
        let mut ctx = HashMap::new();
        ctx.insert("channel".to_string(), json!("web"));
        let batch =
            determine_batch(&route, None, &FieldMap::new(), &ctx, &EventSink::new()).unwrap();
        assert_eq!(batch.skipped, vec!["sms_only"]);
        assert_eq!(batch.stop, BatchStop::RouteComplete);
    }

    #[test]
    fn revisit_is_a_configuration_error() {
        let route = Route::builder("r", "R")
            .step(Step::new("a"))
            .step(Step::new("b"))
            .chain(["a", "b", "a"])
            .build()
            .unwrap();
        let err = determine_batch(&route, None, &FieldMap::new(), &HashMap::new(), &EventSink::new())
            .unwrap_err();
        assert!(matches!(err, ParleyError::CycleDetected { ref step, .. } if step == "a"));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn unknown_start_step_is_an_error() {
        let route = signup();
        let err = determine_batch(&route, Some("ghost"), &FieldMap::new(), &HashMap::new(), &EventSink::new())
            .unwrap_err();
        assert!(matches!(err, ParleyError::StepNotFound { .. }));
    }

    #[test]
    fn emits_ordered_events() {
        let route = signup();
        let names = Arc::new(Mutex::new(Vec::new()));
        let recorder = names.clone();
        let mut sink = EventSink::new();
        sink.add(crate::events::FnListener(move |e: &BatchEvent| {
            recorder.lock().unwrap().push((e.name(), e.batch_size()));
            Ok(())
        }));

        determine_batch(&route, None, &FieldMap::new(), &HashMap::new(), &sink).unwrap();

        assert_eq!(
            *names.lock().unwrap(),
            vec![("batch_start", 0), ("step_included", 1), ("batch_stop", 1)]
        );
    }

    #[test]
    fn emits_step_skipped_with_step_and_running_size() {
        let route = Route::builder("upsell", "Upsell")
            .step(
                Step::new("offer_pro")
                    .with_collect(["accepted"])
                    .with_skip_if(SkipIf::condition("plan=pro").unwrap()),
            )
            .step(Step::new("greet"))
            .step(Step::new("ask_name").with_collect(["name"]))
            .chain(["offer_pro", "greet", "ask_name"])
            .build()
            .unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorder = events.clone();
        let mut sink = EventSink::new();
        sink.add(crate::events::FnListener(move |e: &BatchEvent| {
            recorder.lock().unwrap().push(e.clone());
            Ok(())
        }));

        let batch = determine_batch(&route, None, &data(&[("plan", json!("pro"))]), &HashMap::new(), &sink).unwrap();
        assert_eq!(batch.skipped, vec!["offer_pro"]);

        let events = events.lock().unwrap();
        let summary: Vec<_> = events.iter().map(|e| (e.name(), e.step_id(), e.batch_size())).collect();
        assert_eq!(
            summary,
            vec![
                ("batch_start", Some("offer_pro"), 0),
                ("step_skipped", Some("offer_pro"), 0),
                ("step_included", Some("greet"), 1),
                ("batch_stop", Some("ask_name"), 1),
            ]
        );
        match &events[1] {
            BatchEvent::StepSkipped { reason, .. } => assert_eq!(reason, "skip condition holds"),
            other => panic!("expected step_skipped, got {other:?}"),
        }
    }
}
