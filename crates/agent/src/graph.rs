//! Compiled agent graphs, cached by the capability set they were built for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tracing::debug;

use operator_core::flows::{AgentToolsGraph, GraphRouter};

use crate::llm::ToolSchema;
use crate::tools::ToolRegistry;

/// The fixed routing graph plus the tool schemas advertised to the model.
///
/// Built once per capability set and never mutated while a run uses it.
pub struct CompiledGraph {
    fingerprint: String,
    router: GraphRouter<AgentToolsGraph>,
    schemas: Vec<ToolSchema>,
}

impl CompiledGraph {
    pub fn compile(registry: &ToolRegistry) -> Self {
        let schemas = registry.schemas();
        Self { fingerprint: fingerprint(&schemas), router: GraphRouter::default(), schemas }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn router(&self) -> &GraphRouter<AgentToolsGraph> {
        &self.router
    }

    pub fn tool_schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }
}

/// SHA-256 over tool names, descriptions and parameter schemas, in name order.
pub fn fingerprint(schemas: &[ToolSchema]) -> String {
    let mut sorted: Vec<&ToolSchema> = schemas.iter().collect();
    sorted.sort_by(|left, right| left.name.cmp(&right.name));

    let mut hasher = Sha256::new();
    for schema in sorted {
        hasher.update(schema.name.as_bytes());
        hasher.update([0]);
        hasher.update(schema.description.as_bytes());
        hasher.update([0]);
        hasher.update(schema.parameters.to_string().as_bytes());
        hasher.update([0xff]);
    }
    hasher.finalize().iter().map(|byte| format!("{byte:02x}")).collect()
}

#[derive(Default)]
pub struct GraphCache {
    graphs: Mutex<HashMap<String, Arc<CompiledGraph>>>,
}

impl GraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(&self, registry: &ToolRegistry) -> Arc<CompiledGraph> {
        let compiled = CompiledGraph::compile(registry);
        let mut graphs = match self.graphs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(existing) = graphs.get(compiled.fingerprint()) {
            return existing.clone();
        }

        debug!(
            event_name = "agent.graph.compiled",
            fingerprint = %compiled.fingerprint(),
            tools = compiled.tool_schemas().len(),
            "compiled agent graph"
        );
        let compiled = Arc::new(compiled);
        graphs.insert(compiled.fingerprint().to_string(), compiled.clone());
        compiled
    }

    pub fn len(&self) -> usize {
        match self.graphs.lock() {
            Ok(graphs) => graphs.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::GraphCache;
    use crate::tools::{Tool, ToolRegistry};

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    fn registry(names: &[&'static str]) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for name in names {
            registry.register(Named(name));
        }
        registry
    }

    #[test]
    fn identical_capability_sets_share_one_graph() {
        let cache = GraphCache::new();

        let first = cache.get_or_compile(&registry(&["a", "b"]));
        let second = cache.get_or_compile(&registry(&["b", "a"]));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert_eq!(first.fingerprint().len(), 64);
    }

    #[test]
    fn different_capability_sets_compile_separately() {
        let cache = GraphCache::new();

        let first = cache.get_or_compile(&registry(&["a"]));
        let second = cache.get_or_compile(&registry(&["a", "b"]));

        assert_ne!(first.fingerprint(), second.fingerprint());
        assert_eq!(second.tool_schemas().len(), 2);
        assert_eq!(cache.len(), 2);
    }
}
