use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use parley_types::Context;

/// Definition of a tool that can be presented to a model or bound to a hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Trait for tools invoked by step hooks.
///
/// `context` is the turn's shared context; writes made here are visible to
/// hooks that run later in the same turn.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(
        &self,
        arguments: serde_json::Value,
        context: &Context,
    ) -> parley_types::Result<serde_json::Value>;
}

/// Registry that holds named tools and provides lookup.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_shared(Arc::new(tool));
    }

    /// Register a tool that is also referenced elsewhere (e.g. by a hook).
    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        let def = tool.definition();
        tracing::debug!(tool = %def.name, "Registering tool");
        self.tools.insert(def.name, tool);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = self.names();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StampTool;

    #[async_trait]
    impl Tool for StampTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "stamp".into(),
                description: "Writes the step id into the context".into(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn execute(
            &self,
            arguments: serde_json::Value,
            context: &Context,
        ) -> parley_types::Result<serde_json::Value> {
            let step = arguments["step"].clone();
            context.set("stamped", step.clone()).await;
            Ok(step)
        }
    }

    #[test]
    fn register_lookup_unregister() {
        let mut reg = ToolRegistry::new();
        assert!(reg.is_empty());
        reg.register(StampTool);
        assert!(reg.contains("stamp"));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.definitions()[0].name, "stamp");
        assert!(reg.get("missing").is_none());
        assert!(reg.unregister("stamp"));
        assert!(!reg.unregister("stamp"));
    }

    #[tokio::test]
    async fn tool_writes_to_shared_context() {
        let mut reg = ToolRegistry::new();
        reg.register(StampTool);
        let ctx = Context::new();

        let tool = reg.get("stamp").unwrap();
        let out = tool.execute(json!({"step": "greet"}), &ctx).await.unwrap();

        assert_eq!(out, json!("greet"));
        assert_eq!(ctx.get("stamped").await, Some(json!("greet")));
    }
}
