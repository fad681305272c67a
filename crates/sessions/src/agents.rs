//! The agent container.
//!
//! Agents are plain values with a name and an `execute` method,
//! registered as singletons in a registry the kernel hands to
//! workflows via `ctx.agents()`. No DI container, no decorators —
//! explicit construction.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use orchid_domain::Result;

/// One agent: a named, executable unit a workflow can invoke.
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Execute with a structured input, producing a structured output.
    async fn execute(&self, input: Value) -> Result<Value>;
}

/// Mapping from agent name to singleton instance.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with(mut self, agent: Arc<dyn Agent>) -> Self {
        self.register(agent);
        self
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.name().to_owned(), agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    #[async_trait::async_trait]
    impl Agent for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn execute(&self, input: Value) -> Result<Value> {
            let text = input.as_str().unwrap_or_default();
            Ok(json!(text.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn registry_lookup_and_execute() {
        let registry = AgentRegistry::new().with(Arc::new(Upper));
        assert_eq!(registry.names(), vec!["upper".to_owned()]);

        let agent = registry.get("upper").unwrap();
        let out = agent.execute(json!("hi")).await.unwrap();
        assert_eq!(out, json!("HI"));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn later_registration_replaces() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(Upper));
        registry.register(Arc::new(Upper));
        assert_eq!(registry.len(), 1);
    }
}
