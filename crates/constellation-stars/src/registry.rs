//! Star/Directive lookup tables, grounded on
//! `tandem-core::agents::AgentRegistry`'s shape: an `Arc<RwLock<HashMap<..>>>`
//! with a simple `get`/`register` surface.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::directive::Directive;
use crate::star::Star;

#[derive(Clone, Default)]
pub struct StarRegistry {
    stars: Arc<RwLock<HashMap<String, Arc<dyn Star>>>>,
}

impl StarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, star: Arc<dyn Star>) {
        self.stars.write().await.insert(star.id().to_string(), star);
    }

    pub async fn get(&self, star_id: &str) -> Option<Arc<dyn Star>> {
        self.stars.read().await.get(star_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.stars.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Clone, Default)]
pub struct DirectiveRegistry {
    directives: Arc<RwLock<HashMap<String, Directive>>>,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, directive: Directive) {
        self.directives
            .write()
            .await
            .insert(directive.id.clone(), directive);
    }

    pub async fn get(&self, directive_id: &str) -> Option<Directive> {
        self.directives.read().await.get(directive_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ConstellationContext;
    use crate::star::{StarExecutionError, StarType};
    use async_trait::async_trait;
    use constellation_types::StarOutput;

    struct EchoStar;

    #[async_trait]
    impl Star for EchoStar {
        fn id(&self) -> &str {
            "echo"
        }
        fn name(&self) -> &str {
            "Echo"
        }
        fn star_type(&self) -> StarType {
            StarType::Worker
        }
        fn directive_id(&self) -> &str {
            "echo_directive"
        }
        async fn execute(
            &self,
            _context: &mut ConstellationContext,
        ) -> Result<StarOutput, StarExecutionError> {
            Ok(StarOutput::WorkerOutput {
                result: "echoed".into(),
                tool_calls: None,
            })
        }
    }

    #[tokio::test]
    async fn registry_resolves_registered_stars_by_id() {
        let registry = StarRegistry::new();
        registry.register(std::sync::Arc::new(EchoStar)).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.get("echo").await.is_some());
        assert!(registry.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn directive_registry_round_trips() {
        let registry = DirectiveRegistry::new();
        registry
            .register(Directive {
                id: "d1".into(),
                name: "Directive One".into(),
                description: String::new(),
                content: String::new(),
                template_variables: vec![],
                probe_ids: vec![],
            })
            .await;
        assert!(registry.get("d1").await.is_some());
        assert!(registry.get("d2").await.is_none());
    }
}
