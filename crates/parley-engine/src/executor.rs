//! The batch executor: one turn of determine, prepare, generate, collect and
//! finalize.
//!
//! A turn never hands back a half-applied session. Prepare and generation
//! failures return the session exactly as it came in. Once the model has
//! answered, collected data is merged even if it fails schema validation,
//! and finalize failures are reported without touching the stop reason.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parley_llm::{extract_structured, CancellationToken, DynGenerator, Generator};
use parley_tools::ToolRegistry;
use parley_types::{Context, FieldMap, HistoryRole, ParleyError, Result, SessionState};
use serde::{Deserialize, Serialize};

use crate::batch::{determine_batch, BatchResult, BatchStop, StoppedReason};
use crate::collect::collect_batch_data;
use crate::config::ExecutorConfig;
use crate::events::{BatchEvent, EventListener, EventSink, PhaseTimings};
use crate::hooks::{run_finalize_hooks, run_prepare_hooks, HookDispatcher, HookError};
use crate::prompt::build_request;
use crate::route::Route;
use crate::schema::ValidationError;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnErrorKind {
    PrepareError,
    LlmError,
    DataValidation,
    FinalizeHook,
}

impl TurnErrorKind {
    pub fn is_fatal(self) -> bool {
        matches!(self, TurnErrorKind::PrepareError | TurnErrorKind::LlmError)
    }
}

/// The primary error of a turn.
#[derive(Debug, Clone)]
pub struct TurnError {
    pub kind: TurnErrorKind,
    pub message: String,
    pub step_id: Option<String>,
    pub source: Option<Arc<ParleyError>>,
}

impl TurnError {
    fn fatal(kind: TurnErrorKind, step_id: Option<String>, source: ParleyError) -> Self {
        Self {
            kind,
            message: source.to_string(),
            step_id,
            source: Some(Arc::new(source)),
        }
    }
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step_id {
            Some(step) => write!(f, "{:?} at '{}': {}", self.kind, step, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

/// Everything a caller learns from one turn.
#[derive(Debug, Clone)]
pub struct TurnResult {
    /// The session to persist. Unchanged from the input on fatal errors and
    /// on an empty batch that needs input. A finished route is recorded in
    /// `completed_routes` even when every remaining step was skipped.
    pub session: SessionState,
    pub stopped_reason: StoppedReason,
    /// The step that needs input next, if any.
    pub stopped_at: Option<String>,
    /// Batch steps that ran. On a prepare failure, the ones whose prepare
    /// work completed; empty on a generation failure.
    pub executed_steps: Vec<String>,
    /// Model message; empty on fatal errors and when no model call was made.
    pub message: String,
    pub collected_data: FieldMap,
    pub fields_collected: Vec<String>,
    pub fields_missing: Vec<String>,
    pub validation_errors: Vec<ValidationError>,
    pub finalize_errors: Vec<HookError>,
    pub error: Option<TurnError>,
    pub timings: PhaseTimings,
}

impl TurnResult {
    fn unchanged(session: &SessionState, stopped_reason: StoppedReason, stopped_at: Option<String>) -> Self {
        Self {
            session: session.clone(),
            stopped_reason,
            stopped_at,
            executed_steps: Vec::new(),
            message: String::new(),
            collected_data: FieldMap::new(),
            fields_collected: Vec::new(),
            fields_missing: Vec::new(),
            validation_errors: Vec::new(),
            finalize_errors: Vec::new(),
            error: None,
            timings: PhaseTimings::default(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.stopped_reason.is_fatal()
    }

    /// `true` when no error of any kind was recorded.
    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.validation_errors.is_empty() && self.finalize_errors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// BatchExecutor
// ---------------------------------------------------------------------------

/// Drives turns against one generator. Holds no per-session state, so a
/// single executor can serve many sessions concurrently.
#[derive(Debug)]
pub struct BatchExecutor {
    generator: DynGenerator,
    dispatcher: HookDispatcher,
    events: EventSink,
    config: ExecutorConfig,
}

impl BatchExecutor {
    pub fn new(generator: impl Generator + 'static) -> Self {
        Self {
            generator: DynGenerator::new(generator),
            dispatcher: HookDispatcher::default(),
            events: EventSink::new(),
            config: ExecutorConfig::default(),
        }
    }

    /// Tools used to resolve named hook references.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.dispatcher = HookDispatcher::new(Arc::new(tools));
        self
    }

    pub fn with_listener(mut self, listener: impl EventListener + 'static) -> Self {
        self.events.add(listener);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.dispatcher.tools()
    }

    /// Run one full turn for `session` on `route`.
    ///
    /// The walk starts at the session's current step when the session is
    /// positioned on this route, otherwise at the initial step. `Err` is
    /// returned only for route configuration faults found while walking.
    pub async fn run_turn(
        &self,
        route: &Route,
        session: &SessionState,
        context: &Context,
        cancel: &CancellationToken,
    ) -> Result<TurnResult> {
        let started = Instant::now();
        let current_step = session
            .current_route
            .as_deref()
            .filter(|r| *r == route.id)
            .and(session.current_step.as_deref());
        tracing::info!(session = %session.id, route = %route.id, step = ?current_step, "Turn started");

        let snapshot = context.snapshot().await;
        let batch = determine_batch(route, current_step, &session.data, &snapshot, &self.events)?;
        let determine_ms = elapsed_ms(started);

        Ok(self
            .execute_batch(route, batch, session, context, cancel, started, determine_ms)
            .await)
    }

    /// Execute an already-determined batch.
    #[allow(clippy::too_many_arguments)]
    async fn execute_batch(
        &self,
        route: &Route,
        batch: BatchResult<'_>,
        session: &SessionState,
        context: &Context,
        cancel: &CancellationToken,
        started: Instant,
        determine_ms: u64,
    ) -> TurnResult {
        let mut timings = PhaseTimings {
            determine_ms,
            ..Default::default()
        };
        let original = StoppedReason::from(batch.stop);

        if batch.is_empty() {
            tracing::info!(route = %route.id, reason = %original, "Empty batch; no model call");
            let mut result = TurnResult::unchanged(session, original, batch.stopped_at.clone());
            if original.is_route_finished() {
                result.session = session.with_route_completed(&route.id);
            }
            return self.complete(result, 0, timings, started);
        }
        let batch_size = batch.steps.len();

        // Phase 1: prepare
        let phase = Instant::now();
        let prepared = run_prepare_hooks(&self.dispatcher, &batch.steps, context, &session.data).await;
        timings.prepare_ms = elapsed_ms(phase);
        if let Err(failure) = prepared {
            let mut result = TurnResult::unchanged(session, StoppedReason::PrepareError, batch.stopped_at.clone());
            result.executed_steps = failure.completed;
            result.error = Some(TurnError::fatal(
                TurnErrorKind::PrepareError,
                Some(failure.step_id),
                failure.source,
            ));
            return self.complete(result, batch_size, timings, started);
        }

        // Phase 2: generate
        let request = build_request(route, &batch, session, self.config.history_window);
        tracing::info!(
            generator = %self.generator.name(),
            steps = batch_size,
            fields = ?request.collect_fields,
            "Calling generator"
        );
        let phase = Instant::now();
        let generated = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ParleyError::Cancelled),
            reply = self.generator.generate(&request, cancel) => reply,
        };
        timings.generate_ms = elapsed_ms(phase);
        let generation = match generated {
            Ok(generation) => generation,
            Err(e) => {
                tracing::warn!(generator = %self.generator.name(), error = %e, "Generation failed; session unchanged");
                let mut result = TurnResult::unchanged(session, StoppedReason::LlmError, batch.stopped_at.clone());
                result.error = Some(TurnError::fatal(TurnErrorKind::LlmError, None, e));
                return self.complete(result, batch_size, timings, started);
            }
        };

        // Phase 3: collect
        let phase = Instant::now();
        let structured = match generation.structured {
            Some(map) => Some(map),
            None if self.config.extract_structured_from_message => extract_structured(&generation.message),
            None => None,
        };
        let collected = collect_batch_data(&batch.steps, structured.as_ref(), session, route.schema.as_ref());
        timings.collect_ms = elapsed_ms(phase);
        let checkpoint = collected.updated_session;

        // Phase 4: finalize
        let phase = Instant::now();
        let finalize_errors = run_finalize_hooks(&self.dispatcher, &batch.steps, context, &checkpoint.data).await;
        timings.finalize_ms = elapsed_ms(phase);

        let stopped_reason = if collected.validation_errors.is_empty() {
            original
        } else {
            StoppedReason::ValidationError
        };

        let mut next = match batch.stop {
            BatchStop::NeedsInput => checkpoint.with_position(&route.id, batch.stopped_at.as_deref()),
            BatchStop::EndRoute | BatchStop::RouteComplete => checkpoint.with_route_completed(&route.id),
        };
        if self.config.record_history && !generation.message.is_empty() {
            let last_step = batch.steps.last().map(|s| s.id.as_str());
            next = next.with_message(HistoryRole::Assistant, generation.message.clone(), last_step);
        }

        let error = auxiliary_error(&collected.validation_errors, &finalize_errors);
        let result = TurnResult {
            session: next,
            stopped_reason,
            stopped_at: batch.stopped_at.clone(),
            executed_steps: batch.step_ids(),
            message: generation.message,
            collected_data: collected.collected_data,
            fields_collected: collected.fields_collected,
            fields_missing: collected.fields_missing,
            validation_errors: collected.validation_errors,
            finalize_errors,
            error,
            timings,
        };
        self.complete(result, batch_size, timings, started)
    }

    fn complete(
        &self,
        mut result: TurnResult,
        batch_size: usize,
        mut timings: PhaseTimings,
        started: Instant,
    ) -> TurnResult {
        timings.total_ms = elapsed_ms(started);
        result.timings = timings;
        let reason = match &result.error {
            Some(e) => e.to_string(),
            None => format!("turn finished: {}", result.stopped_reason),
        };
        tracing::info!(
            session = %result.session.id,
            stopped_reason = %result.stopped_reason,
            executed = result.executed_steps.len(),
            total_ms = timings.total_ms,
            "Turn complete"
        );
        self.events.emit(BatchEvent::BatchComplete {
            step_id: result.stopped_at.clone(),
            reason,
            batch_size,
            stopped_reason: result.stopped_reason,
            timings,
        });
        result
    }
}

/// Validation errors take precedence over finalize errors.
fn auxiliary_error(validation: &[ValidationError], finalize: &[HookError]) -> Option<TurnError> {
    if let Some(first) = validation.first() {
        return Some(TurnError {
            kind: TurnErrorKind::DataValidation,
            message: validation
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
            step_id: None,
            source: Some(Arc::new(ParleyError::Other(first.to_string()))),
        });
    }
    let first = finalize.first()?;
    Some(TurnError {
        kind: TurnErrorKind::FinalizeHook,
        message: finalize
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; "),
        step_id: Some(first.step_id.clone()),
        source: Some(Arc::new(first.to_error())),
    })
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
