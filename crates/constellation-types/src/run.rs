//! The persisted `Run` record and its `NodeOutput` entries (spec §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::output::ToolCall;

pub const ORIGINAL_QUERY_KEY: &str = "_original_query";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    AwaitingConfirmation,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    pub node_id: String,
    pub star_id: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl NodeOutput {
    pub fn started(node_id: impl Into<String>, star_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            star_id: star_id.into(),
            status: NodeStatus::Running,
            output: None,
            error: None,
            tool_calls: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn complete(&mut self, output: String, tool_calls: Vec<ToolCall>) {
        self.output = Some(output);
        self.tool_calls = tool_calls;
        self.status = NodeStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: String) {
        self.error = Some(error);
        self.status = NodeStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> i64 {
        match self.completed_at {
            Some(completed) => (completed - self.started_at).num_milliseconds(),
            None => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub constellation_id: String,
    pub constellation_name: String,
    pub status: RunStatus,
    pub variables: HashMap<String, serde_json::Value>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaiting_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaiting_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    #[serde(default)]
    pub node_outputs: HashMap<String, NodeOutput>,
    /// Insertion order of `node_outputs`, since `HashMap` does not preserve
    /// it and spec §4.6.4/§7 require "most recently completed" semantics.
    #[serde(default)]
    pub node_output_order: Vec<String>,
}

impl Run {
    pub fn new(
        id: impl Into<String>,
        constellation_id: impl Into<String>,
        constellation_name: impl Into<String>,
        variables: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            constellation_id: constellation_id.into(),
            constellation_name: constellation_name.into(),
            status: RunStatus::Running,
            variables,
            started_at: Utc::now(),
            completed_at: None,
            final_output: None,
            error: None,
            awaiting_node_id: None,
            awaiting_prompt: None,
            additional_context: None,
            node_outputs: HashMap::new(),
            node_output_order: Vec::new(),
        }
    }

    pub fn record_node_output(&mut self, output: NodeOutput) {
        let id = output.node_id.clone();
        if !self.node_outputs.contains_key(&id) {
            self.node_output_order.push(id.clone());
        }
        self.node_outputs.insert(id, output);
    }

    /// Output of the most recently completed StarNode, in insertion order
    /// (spec §4.6.4).
    pub fn final_output_candidate(&self) -> Option<String> {
        let mut last: Option<String> = None;
        for id in &self.node_output_order {
            if let Some(node_output) = self.node_outputs.get(id) {
                if node_output.status == NodeStatus::Completed {
                    if let Some(output) = &node_output.output {
                        last = Some(output.clone());
                    }
                }
            }
        }
        last
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|completed| (completed - self.started_at).num_milliseconds())
    }
}

/// `run_<12 lowercase hex chars>` (spec §3/§6).
pub fn generate_run_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("run_{}", &hex[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_run_id_matches_expected_shape() {
        let id = generate_run_id();
        assert!(id.starts_with("run_"));
        assert_eq!(id.len(), "run_".len() + 12);
        assert!(id["run_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn final_output_candidate_prefers_most_recently_completed() {
        let mut run = Run::new("run_x", "c", "Constellation", HashMap::new());
        let mut a = NodeOutput::started("a", "star_a");
        a.complete("first".into(), Vec::new());
        run.record_node_output(a);

        let mut b = NodeOutput::started("b", "star_b");
        b.complete("second".into(), Vec::new());
        run.record_node_output(b);

        assert_eq!(run.final_output_candidate(), Some("second".to_string()));
    }

    #[test]
    fn final_output_candidate_skips_failed_nodes() {
        let mut run = Run::new("run_x", "c", "Constellation", HashMap::new());
        let mut a = NodeOutput::started("a", "star_a");
        a.complete("first".into(), Vec::new());
        run.record_node_output(a);

        let mut b = NodeOutput::started("b", "star_b");
        b.fail("boom".into());
        run.record_node_output(b);

        assert_eq!(run.final_output_candidate(), Some("first".to_string()));
    }
}
