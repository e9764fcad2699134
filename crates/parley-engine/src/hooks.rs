//! Step hooks: reference types, the single dispatcher, and the prepare and
//! finalize phases.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parley_tools::ToolRegistry;
use parley_types::{Context, FieldMap, ParleyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::route::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    Prepare,
    Finalize,
}

impl HookPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::Prepare => "prepare",
            HookPhase::Finalize => "finalize",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a hook receives. `context` is a shared handle: writes are seen
/// by later hooks in the same turn.
#[derive(Debug, Clone)]
pub struct HookInvocation {
    pub context: Context,
    pub data: FieldMap,
    pub step: Step,
    pub phase: HookPhase,
}

// ---------------------------------------------------------------------------
// HookFn and HookRef
// ---------------------------------------------------------------------------

#[async_trait]
pub trait HookFn: Send + Sync {
    async fn call(&self, invocation: HookInvocation) -> Result<()>;
}

struct FnHook<F>(F);

#[async_trait]
impl<F, Fut> HookFn for FnHook<F>
where
    F: Fn(HookInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn call(&self, invocation: HookInvocation) -> Result<()> {
        (self.0)(invocation).await
    }
}

/// Wrap an async closure as a callable hook.
pub fn hook_fn<F, Fut>(f: F) -> HookRef
where
    F: Fn(HookInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    HookRef::Callable(Arc::new(FnHook(f)))
}

/// A hook: a callable, the name of a registered tool, or a tool instance.
#[derive(Clone)]
pub enum HookRef {
    Callable(Arc<dyn HookFn>),
    Named(String),
    Tool(Arc<dyn parley_tools::Tool>),
}

impl HookRef {
    pub fn named(name: impl Into<String>) -> Self {
        HookRef::Named(name.into())
    }

    pub fn tool(tool: impl parley_tools::Tool + 'static) -> Self {
        HookRef::Tool(Arc::new(tool))
    }

    pub fn describe(&self) -> String {
        match self {
            HookRef::Callable(_) => "callable".to_string(),
            HookRef::Named(name) => format!("tool '{name}'"),
            HookRef::Tool(tool) => format!("tool '{}'", tool.definition().name),
        }
    }
}

impl fmt::Debug for HookRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookRef::Callable(_) => f.write_str("Callable(<fn>)"),
            HookRef::Named(name) => f.debug_tuple("Named").field(name).finish(),
            HookRef::Tool(tool) => f.debug_tuple("Tool").field(&tool.definition().name).finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// HookDispatcher
// ---------------------------------------------------------------------------

/// Resolves a [`HookRef`] and invokes it. The only place that looks at
/// which kind of hook it was given.
#[derive(Debug, Clone, Default)]
pub struct HookDispatcher {
    tools: Arc<ToolRegistry>,
}

impl HookDispatcher {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Resolve and run `hook`. A panicking hook is reported as an error.
    pub async fn invoke(&self, hook: &HookRef, invocation: HookInvocation) -> Result<()> {
        match AssertUnwindSafe(self.dispatch(hook, invocation))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(ParleyError::Other(format!(
                "hook {} panicked: {}",
                hook.describe(),
                panic_message(payload.as_ref())
            ))),
        }
    }

    async fn dispatch(&self, hook: &HookRef, invocation: HookInvocation) -> Result<()> {
        match hook {
            HookRef::Callable(f) => f.call(invocation).await,
            HookRef::Named(name) => {
                let tool = self
                    .tools
                    .get(name)
                    .ok_or_else(|| ParleyError::ToolNotFound { tool: name.clone() })?;
                call_tool(tool.as_ref(), invocation).await
            }
            HookRef::Tool(tool) => call_tool(tool.as_ref(), invocation).await,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Tools get `{"step", "phase", "data"}`. An object result is merged into the
/// shared context.
async fn call_tool(tool: &dyn parley_tools::Tool, invocation: HookInvocation) -> Result<()> {
    let name = tool.definition().name;
    let arguments = json!({
        "step": invocation.step.id,
        "phase": invocation.phase,
        "data": invocation.data,
    });
    tracing::debug!(tool = %name, step = %invocation.step.id, phase = %invocation.phase, "Invoking hook tool");
    match tool.execute(arguments, &invocation.context).await? {
        Value::Object(updates) => {
            invocation
                .context
                .apply_updates(updates.into_iter().collect())
                .await;
        }
        Value::Null => {}
        other => {
            tracing::debug!(tool = %name, result = %other, "Ignoring non-object hook tool result");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// One hook failure, as reported in a turn result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookError {
    pub step_id: String,
    pub phase: HookPhase,
    pub message: String,
}

impl HookError {
    fn new(step: &Step, phase: HookPhase, error: &ParleyError) -> Self {
        Self {
            step_id: step.id.clone(),
            phase,
            message: error.to_string(),
        }
    }

    pub fn to_error(&self) -> ParleyError {
        ParleyError::HookFailed {
            phase: self.phase.to_string(),
            step: self.step_id.clone(),
            message: self.message.clone(),
        }
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hook on '{}': {}", self.phase, self.step_id, self.message)
    }
}

/// The prepare phase stopped at `step_id`.
#[derive(Debug)]
pub struct PrepareFailure {
    /// Steps whose prepare work finished before the failure, in batch order.
    pub completed: Vec<String>,
    pub step_id: String,
    pub source: ParleyError,
}

/// Run prepare hooks in batch order, stopping at the first failure.
///
/// On success returns every batch step id; steps without a prepare hook count
/// as completed.
pub async fn run_prepare_hooks(
    dispatcher: &HookDispatcher,
    steps: &[&Step],
    context: &Context,
    data: &FieldMap,
) -> std::result::Result<Vec<String>, PrepareFailure> {
    let mut completed = Vec::with_capacity(steps.len());
    for step in steps {
        if let Some(hook) = &step.prepare {
            let invocation = invocation(step, HookPhase::Prepare, context, data);
            if let Err(source) = dispatcher.invoke(hook, invocation).await {
                tracing::warn!(step = %step.id, hook = %hook.describe(), error = %source, "Prepare hook failed");
                return Err(PrepareFailure {
                    completed,
                    step_id: step.id.clone(),
                    source,
                });
            }
        }
        completed.push(step.id.clone());
    }
    Ok(completed)
}

/// Run finalize hooks in batch order. Failures are logged and collected;
/// every hook runs.
pub async fn run_finalize_hooks(
    dispatcher: &HookDispatcher,
    steps: &[&Step],
    context: &Context,
    data: &FieldMap,
) -> Vec<HookError> {
    let mut errors = Vec::new();
    for step in steps {
        let Some(hook) = &step.finalize else {
            continue;
        };
        let invocation = invocation(step, HookPhase::Finalize, context, data);
        if let Err(e) = dispatcher.invoke(hook, invocation).await {
            tracing::warn!(step = %step.id, hook = %hook.describe(), error = %e, "Finalize hook failed; continuing");
            errors.push(HookError::new(step, HookPhase::Finalize, &e));
        }
    }
    errors
}

fn invocation(step: &Step, phase: HookPhase, context: &Context, data: &FieldMap) -> HookInvocation {
    HookInvocation {
        context: context.clone(),
        data: data.clone(),
        step: step.clone(),
        phase,
    }
}
