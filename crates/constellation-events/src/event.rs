//! The structured progress events the Event Stream (C3) accepts (spec §4.3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        constellation_id: String,
        constellation_name: String,
        total_nodes: usize,
        node_names: Vec<String>,
    },
    NodeStarted {
        run_id: String,
        node_id: String,
        node_name: String,
        star_id: String,
        star_type: String,
        node_index: usize,
        total_nodes: usize,
    },
    NodeCompleted {
        run_id: String,
        node_id: String,
        node_name: String,
        output_preview: String,
        duration_ms: i64,
    },
    NodeFailed {
        run_id: String,
        node_id: String,
        node_name: String,
        error: String,
        duration_ms: i64,
    },
    RunPaused {
        run_id: String,
        node_id: String,
        node_name: String,
        prompt: String,
    },
    RunResumed {
        run_id: String,
        resumed_from_node: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        additional_context: Option<String>,
    },
    RunCompleted {
        run_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<i64>,
    },
    RunFailed {
        run_id: String,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failed_node_id: Option<String>,
    },
}

/// Truncates `RunCompleted.final_output` to 500 chars per spec §4.3.
pub fn truncate_final_output(output: Option<&str>, max_len: usize) -> Option<String> {
    output.map(|text| {
        if text.chars().count() <= max_len {
            text.to_string()
        } else {
            text.chars().take(max_len).collect()
        }
    })
}
