//! `ConstellationContext`: the in-memory working set for one Run (spec §3).

use std::collections::HashMap;
use std::sync::Arc;

use constellation_events::{EventSink, NoopEventSink};
use constellation_types::StarOutput;
use serde_json::Value;
use tokio::sync::Mutex;

/// A prior node's recorded output, as seen from inside the running Run.
/// After a resume (§4.8 step 5), restored entries carry only the opaque
/// text the store persisted, not the original `StarOutput` shape.
#[derive(Debug, Clone)]
pub enum NodeOutputValue {
    Star(StarOutput),
    Text(String),
}

impl NodeOutputValue {
    /// Mirrors §4.4/§4.5's extraction priority: `result`, then
    /// `formatted_result`, then the opaque/text value itself.
    pub fn extract(&self) -> String {
        match self {
            NodeOutputValue::Star(output) => {
                constellation_types::extract_binding_value(output).unwrap_or_default()
            }
            NodeOutputValue::Text(text) => text.clone(),
        }
    }
}

pub struct ConstellationContext {
    pub run_id: String,
    pub constellation_id: String,
    pub original_query: String,
    pub constellation_purpose: String,
    pub variables: HashMap<String, Value>,
    node_outputs: HashMap<String, NodeOutputValue>,
    /// Insertion order, since §4.6.4/§9's "most recent upstream output"
    /// fallback depends on it and `HashMap` does not preserve one.
    node_output_order: Vec<String>,
    pub stream: Arc<dyn EventSink>,
    pub current_node_id: Option<String>,
    pub current_node_name: Option<String>,
    /// Shared across parallel branches within one Run; §4.6.3/§9 require
    /// the increment-and-compare to be a single atomic operation.
    pub loop_count: Arc<Mutex<u32>>,
}

impl ConstellationContext {
    pub fn new(
        run_id: impl Into<String>,
        constellation_id: impl Into<String>,
        original_query: impl Into<String>,
        constellation_purpose: impl Into<String>,
        variables: HashMap<String, Value>,
        stream: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            constellation_id: constellation_id.into(),
            original_query: original_query.into(),
            constellation_purpose: constellation_purpose.into(),
            variables,
            node_outputs: HashMap::new(),
            node_output_order: Vec::new(),
            stream,
            current_node_id: None,
            current_node_name: None,
            loop_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn without_stream(
        run_id: impl Into<String>,
        constellation_id: impl Into<String>,
        original_query: impl Into<String>,
        constellation_purpose: impl Into<String>,
        variables: HashMap<String, Value>,
    ) -> Self {
        Self::new(
            run_id,
            constellation_id,
            original_query,
            constellation_purpose,
            variables,
            Arc::new(NoopEventSink),
        )
    }

    /// Read-only view, per spec §6: "The Star MUST NOT mutate
    /// `node_outputs`."
    pub fn node_outputs(&self) -> &HashMap<String, NodeOutputValue> {
        &self.node_outputs
    }

    pub fn node_output_order(&self) -> &[String] {
        &self.node_output_order
    }

    /// Runner-only mutation point (spec §4.6.1 step 5). Not exposed to Star
    /// implementations through any trait method.
    pub fn record_node_output(&mut self, node_id: impl Into<String>, value: NodeOutputValue) {
        let id = node_id.into();
        if !self.node_outputs.contains_key(&id) {
            self.node_output_order.push(id.clone());
        }
        self.node_outputs.insert(id, value);
    }

    /// Clears one node's recorded output (spec §4.6.3 step 4, §P9).
    pub fn clear_node_output(&mut self, node_id: &str) {
        if self.node_outputs.remove(node_id).is_some() {
            self.node_output_order.retain(|id| id != node_id);
        }
    }

    pub fn most_recent_output(&self) -> Option<&NodeOutputValue> {
        self.node_output_order
            .last()
            .and_then(|id| self.node_outputs.get(id))
    }
}
