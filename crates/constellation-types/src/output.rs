//! `StarOutput`: the tagged union a Star returns, and the normalization
//! rules the Star Execution Adapter (C4) and variable binder (§4.5) apply
//! to it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_TOOL_RESULT_TRUNCATE_AT: usize = 500;
pub const TOOL_RESULT_TRUNCATE_SUFFIX: &str = "... [truncated]";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCall {
    /// Truncates `result` to `max_len` chars, appending the truncation
    /// suffix. Never touches `tool_name`/`arguments`/`error`.
    pub fn truncated(&self, max_len: usize) -> ToolCall {
        ToolCall {
            tool_name: self.tool_name.clone(),
            arguments: self.arguments.clone(),
            result: self.result.as_ref().map(|r| truncate_with_suffix(r, max_len)),
            error: self.error.clone(),
        }
    }
}

fn truncate_with_suffix(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_len).collect();
    format!("{truncated}{TOOL_RESULT_TRUNCATE_SUFFIX}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutputItem {
    pub result: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentExtraction {
    pub extracted_content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTask {
    pub description: String,
}

/// The result a Star's `execute` returns. Unknown/custom shapes are
/// preserved as `Opaque` so the Runner can still coerce them to text
/// (spec §3: "the Runner must tolerate unknown variants").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StarOutput {
    WorkerOutput {
        result: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },
    SynthesisOutput {
        formatted_result: String,
    },
    ExecutionResult {
        worker_outputs: Vec<WorkerOutputItem>,
    },
    DocExResult {
        documents: Vec<DocumentExtraction>,
    },
    EvalDecision {
        decision: String,
        reasoning: String,
    },
    Plan {
        tasks: Vec<PlanTask>,
    },
    /// Any other shape (spec §3: "the Runner must tolerate unknown variants
    /// by treating them as opaque text").
    Opaque(Value),
}

impl StarOutput {
    pub fn as_eval_decision(&self) -> Option<(&str, &str)> {
        match self {
            StarOutput::EvalDecision { decision, reasoning } => {
                Some((decision.as_str(), reasoning.as_str()))
            }
            _ => None,
        }
    }
}

/// Normalized output after a Star completes: the string stored in
/// `NodeOutput.output`, plus tool calls with truncated `result` fields
/// (spec §4.4).
pub struct NormalizedOutput {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Priority rules from spec §4.4, first match wins.
pub fn normalize_output(output: &StarOutput, tool_result_truncate_at: usize) -> NormalizedOutput {
    match output {
        StarOutput::SynthesisOutput { formatted_result } => NormalizedOutput {
            text: formatted_result.clone(),
            tool_calls: Vec::new(),
        },
        StarOutput::WorkerOutput { result, tool_calls } => NormalizedOutput {
            text: result.clone(),
            tool_calls: tool_calls
                .as_ref()
                .map(|calls| {
                    calls
                        .iter()
                        .map(|c| c.truncated(tool_result_truncate_at))
                        .collect()
                })
                .unwrap_or_default(),
        },
        StarOutput::ExecutionResult { worker_outputs } => {
            let joined = worker_outputs
                .iter()
                .map(|w| w.result.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            NormalizedOutput {
                text: joined,
                tool_calls: Vec::new(),
            }
        }
        StarOutput::DocExResult { documents } => {
            let joined = documents
                .iter()
                .map(|d| d.extracted_content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            NormalizedOutput {
                text: joined,
                tool_calls: Vec::new(),
            }
        }
        StarOutput::EvalDecision { decision, reasoning } => NormalizedOutput {
            text: format!("Decision: {decision}. {reasoning}"),
            tool_calls: Vec::new(),
        },
        StarOutput::Plan { tasks } => {
            let descs = tasks
                .iter()
                .take(3)
                .map(|t| t.description.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            NormalizedOutput {
                text: format!("Plan with {} tasks: {descs}", tasks.len()),
                tool_calls: Vec::new(),
            }
        }
        StarOutput::Opaque(value) => NormalizedOutput {
            text: coerce_opaque_to_string(value),
            tool_calls: Vec::new(),
        },
    }
}

fn coerce_opaque_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The value the §4.5 binder extracts from a prior node's recorded output:
/// prefer `result`, then `formatted_result`, then the opaque value itself.
pub fn extract_binding_value(output: &StarOutput) -> Option<String> {
    match output {
        StarOutput::WorkerOutput { result, .. } => Some(result.clone()),
        StarOutput::SynthesisOutput { formatted_result } => Some(formatted_result.clone()),
        StarOutput::ExecutionResult { worker_outputs } => worker_outputs
            .first()
            .map(|w| w.result.clone())
            .or(Some(String::new())),
        StarOutput::DocExResult { documents } => documents
            .first()
            .map(|d| d.extracted_content.clone())
            .or(Some(String::new())),
        StarOutput::EvalDecision { decision, reasoning } => {
            Some(format!("Decision: {decision}. {reasoning}"))
        }
        StarOutput::Plan { .. } => None,
        StarOutput::Opaque(value) => Some(coerce_opaque_to_string(value)),
    }
}

/// Output-preview cutoff for the event stream (spec §4.4: "implementation
/// -defined cutoff of a few hundred characters").
pub const DEFAULT_OUTPUT_PREVIEW_CHARS: usize = 280;

pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesis_output_wins_priority() {
        let out = StarOutput::SynthesisOutput {
            formatted_result: "final".into(),
        };
        assert_eq!(normalize_output(&out, 500).text, "final");
    }

    #[test]
    fn worker_output_truncates_tool_call_results() {
        let long_result = "x".repeat(600);
        let out = StarOutput::WorkerOutput {
            result: "ok".into(),
            tool_calls: Some(vec![ToolCall {
                tool_name: "probe".into(),
                arguments: Value::Null,
                result: Some(long_result),
                error: None,
            }]),
        };
        let normalized = normalize_output(&out, 500);
        assert_eq!(normalized.text, "ok");
        let tc = &normalized.tool_calls[0];
        assert!(tc.result.as_ref().unwrap().ends_with(TOOL_RESULT_TRUNCATE_SUFFIX));
        assert_eq!(tc.result.as_ref().unwrap().chars().count(), 500 + TOOL_RESULT_TRUNCATE_SUFFIX.len());
    }

    #[test]
    fn eval_decision_formats_as_sentence() {
        let out = StarOutput::EvalDecision {
            decision: "continue".into(),
            reasoning: "looks good".into(),
        };
        assert_eq!(normalize_output(&out, 500).text, "Decision: continue. looks good");
    }

    #[test]
    fn plan_takes_first_three_task_descriptions() {
        let out = StarOutput::Plan {
            tasks: vec![
                PlanTask { description: "one".into() },
                PlanTask { description: "two".into() },
                PlanTask { description: "three".into() },
                PlanTask { description: "four".into() },
            ],
        };
        assert_eq!(
            normalize_output(&out, 500).text,
            "Plan with 4 tasks: one; two; three"
        );
    }
}
