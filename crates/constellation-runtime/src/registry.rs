//! Lookup table for `Constellation` graphs, grounded on the same shape as
//! `constellation_stars::StarRegistry` (itself grounded on
//! `tandem-core::agents::AgentRegistry`). The Runner resolves a
//! `constellation_id` through this registry the way the original
//! implementation resolved it through its Foundry/Registry collaborator.

use std::collections::HashMap;
use std::sync::Arc;

use constellation_types::Constellation;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct ConstellationRegistry {
    constellations: Arc<RwLock<HashMap<String, Constellation>>>,
}

impl ConstellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, constellation: Constellation) {
        self.constellations
            .write()
            .await
            .insert(constellation.id.clone(), constellation);
    }

    pub async fn get(&self, constellation_id: &str) -> Option<Constellation> {
        self.constellations.read().await.get(constellation_id).cloned()
    }
}
