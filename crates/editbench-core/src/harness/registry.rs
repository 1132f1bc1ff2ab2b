//! Harness registry -- the named set of agents a run can use.

use std::collections::HashMap;

use super::claude_code::ClaudeCodeAdapter;
use super::script::ScriptAdapter;
use super::trait_def::Harness;
use crate::config::{AgentKind, AgentSpec};

/// A collection of registered [`Harness`] implementations, keyed by name.
#[derive(Default)]
pub struct HarnessRegistry {
    harnesses: HashMap<String, Box<dyn Harness>>,
}

impl HarnessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one adapter per spec. Later specs replace earlier ones with
    /// the same name.
    pub fn from_specs<'a>(specs: impl IntoIterator<Item = &'a AgentSpec>) -> Self {
        let mut registry = Self::new();
        for spec in specs {
            match &spec.kind {
                AgentKind::ClaudeCode {
                    binary,
                    model,
                    max_turns,
                } => {
                    let mut adapter = ClaudeCodeAdapter::with_binary(binary)
                        .named(&spec.name)
                        .with_max_turns(*max_turns);
                    if let Some(model) = model {
                        adapter = adapter.with_model(model);
                    }
                    registry.register(adapter);
                }
                AgentKind::Script { path, timeout_secs } => {
                    registry.register(
                        ScriptAdapter::new(&spec.name, path)
                            .with_timeout(std::time::Duration::from_secs(*timeout_secs)),
                    );
                }
            }
        }
        registry
    }

    /// Register a harness under [`Harness::name`], returning any adapter it
    /// replaced.
    pub fn register(&mut self, harness: impl Harness + 'static) -> Option<Box<dyn Harness>> {
        let name = harness.name().to_string();
        self.harnesses.insert(name, Box::new(harness))
    }

    pub fn get(&self, name: &str) -> Option<&dyn Harness> {
        self.harnesses.get(name).map(|b| b.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.harnesses.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.harnesses.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.harnesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.harnesses.is_empty()
    }
}

impl std::fmt::Debug for HarnessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessRegistry")
            .field("harnesses", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{InvocationError, InvocationRequest, InvocationSummary};
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Harness for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn invoke(
            &self,
            _request: &InvocationRequest,
        ) -> Result<InvocationSummary, InvocationError> {
            Ok(InvocationSummary::default())
        }
    }

    #[test]
    fn empty_registry() {
        let registry = HarnessRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.get("anything").is_none());
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = HarnessRegistry::new();
        assert!(registry.register(Named("zeta")).is_none());
        assert!(registry.register(Named("alpha")).is_none());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("alpha").map(|h| h.name()), Some("alpha"));
        assert!(registry.contains("zeta"));
        assert_eq!(registry.list(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = HarnessRegistry::new();
        registry.register(Named("dup"));
        let old = registry.register(Named("dup"));
        assert!(old.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn builds_adapters_from_specs() {
        let specs: Vec<AgentSpec> = ["claude", "claude:opus", "codex=/opt/agents/codex.sh"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let registry = HarnessRegistry::from_specs(&specs);
        assert_eq!(registry.list(), vec!["claude", "claude-opus", "codex"]);
    }

    #[test]
    fn debug_lists_names() {
        let mut registry = HarnessRegistry::new();
        registry.register(Named("b"));
        registry.register(Named("a"));
        assert_eq!(
            format!("{registry:?}"),
            r#"HarnessRegistry { harnesses: ["a", "b"] }"#
        );
    }
}
