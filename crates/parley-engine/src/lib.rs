//! Batch execution engine for multi-turn, data-collecting conversations.
//!
//! This crate implements the Parley turn runner: step graph traversal with
//! skip and needs-input rules, prepare and finalize hooks, the single model
//! call, schema-checked data collection, lifecycle events, route lint rules,
//! and session store adapters.

pub mod batch;
pub mod collect;
pub mod condition;
pub mod config;
pub mod definition;
pub mod events;
pub mod executor;
pub mod hooks;
pub mod needs_input;
pub mod prompt;
pub mod route;
pub mod schema;
pub mod store;
pub mod validation;

pub use batch::{determine_batch, BatchResult, BatchStop, StoppedReason};
pub use collect::{collect_batch_data, CollectOutcome};
pub use condition::{evaluate_condition, parse_condition, Clause, ConditionExpr, Operator};
pub use config::ExecutorConfig;
pub use definition::{validate_definition, RouteDefinition, StepDefinition, TransitionDefinition, END_ROUTE};
pub use events::{BatchEvent, BroadcastListener, EventListener, EventSink, FnListener, PhaseTimings};
pub use executor::{BatchExecutor, TurnError, TurnErrorKind, TurnResult};
pub use hooks::{
    hook_fn, run_finalize_hooks, run_prepare_hooks, HookDispatcher, HookError, HookFn, HookInvocation,
    HookPhase, HookRef, PrepareFailure,
};
pub use needs_input::{missing_requirements, needs_input};
pub use prompt::{build_request, expand_variables, response_schema, system_prompt};
pub use route::{Route, RouteBuilder, SkipFn, SkipIf, SkipSnapshot, Step, Term, Transition, TransitionTarget};
pub use schema::{PropertySchema, Schema, SchemaType, ValidationError};
pub use store::{FileSessionStore, InMemorySessionStore, SessionStore};
pub use validation::{validate, validate_hooks, validate_or_raise, Diagnostic, LintRule, Severity};
