//! Constructor-time Runner configuration (spec §9 design note: "treat the
//! semantic binding map as constructor-time configuration of the Runner
//! rather than hard-coded"; SPEC_FULL.md §6.3).

use std::collections::HashMap;

use constellation_types::output::{DEFAULT_OUTPUT_PREVIEW_CHARS, DEFAULT_TOOL_RESULT_TRUNCATE_AT};

/// `variable name -> candidate node-id substrings`, consulted in order
/// (spec §4.5 step 3). Defaults to the set observed in the original
/// implementation (`var_to_node_patterns` in `runner.py`).
pub type SemanticBindingMap = HashMap<String, Vec<String>>;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub semantic_bindings: SemanticBindingMap,
    /// Tool-call `result` truncation length for storage (spec §9 open
    /// question; default preserves event-stream compatibility).
    pub tool_result_truncate_at: usize,
    /// `NodeCompleted.output_preview` cutoff (spec §4.4).
    pub output_preview_chars: usize,
    /// Capacity of the default `EventSink` when none is supplied to
    /// `Runner::new_with_defaults`.
    pub default_event_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            semantic_bindings: default_semantic_bindings(),
            tool_result_truncate_at: DEFAULT_TOOL_RESULT_TRUNCATE_AT,
            output_preview_chars: DEFAULT_OUTPUT_PREVIEW_CHARS,
            default_event_capacity: 1024,
        }
    }
}

pub fn default_semantic_bindings() -> SemanticBindingMap {
    let pairs: &[(&str, &[&str])] = &[
        ("structure_analysis", &["excel_parser", "parser"]),
        (
            "detected_patterns",
            &["dependency_mapper", "pattern_detector"],
        ),
        ("dependency_map", &["dependency_mapper"]),
        ("interview_results", &["expert_interview", "interviewer"]),
        ("interview_transcript", &["expert_interview", "interviewer"]),
        (
            "interview_state",
            &["progress_extractor", "expert_interview", "interviewer"],
        ),
        (
            "blueprint_progress",
            &[
                "progress_extractor",
                "expert_interview",
                "blueprint_compiler",
            ],
        ),
        ("verification_results", &["reconstructor", "verifier"]),
        ("validated_input", &["input_validator", "validator"]),
        ("model_blueprint", &["blueprint_compiler"]),
    ];

    pairs
        .iter()
        .map(|(name, patterns)| {
            (
                name.to_string(),
                patterns.iter().map(|p| p.to_string()).collect(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_carries_the_full_original_semantic_map() {
        let config = RunnerConfig::default();
        assert_eq!(config.semantic_bindings.len(), 10);
        assert_eq!(
            config.semantic_bindings.get("model_blueprint").unwrap(),
            &vec!["blueprint_compiler".to_string()]
        );
    }
}
