//! Variable binding (spec §4.5): resolves each `TemplateVariable` a
//! Directive declares against the running context.

use std::collections::HashMap;

use constellation_stars::{ConstellationContext, Directive};
use serde_json::Value;

use crate::config::SemanticBindingMap;
use crate::error::RunnerError;

/// Resolution order from spec §4.5, steps 1-6. Returns the bindings to
/// merge into `context.variables` — callers do the merge so this function
/// stays pure and testable (spec §P7: "given the same context,
/// `resolveBindings` returns the same map").
pub fn resolve_bindings(
    directive: &Directive,
    context: &ConstellationContext,
    semantic_bindings: &SemanticBindingMap,
) -> Result<HashMap<String, Value>, RunnerError> {
    let mut bindings = HashMap::new();

    for var in &directive.template_variables {
        // 1. Explicit variable already present.
        if let Some(value) = context.variables.get(&var.name) {
            bindings.insert(var.name.clone(), value.clone());
            continue;
        }

        // 2. A prior node id equals the variable name.
        if let Some(output) = context.node_outputs().get(&var.name) {
            bindings.insert(var.name.clone(), Value::String(output.extract()));
            continue;
        }

        // 3. Semantic match: first upstream node id containing a listed
        // substring, iterated in insertion order.
        if let Some(patterns) = semantic_bindings.get(&var.name) {
            if let Some(value) = semantic_match(context, patterns) {
                bindings.insert(var.name.clone(), Value::String(value));
                continue;
            }
        }

        // 4. Fallback: most recently completed upstream output.
        if let Some(output) = context.most_recent_output() {
            bindings.insert(var.name.clone(), Value::String(output.extract()));
            continue;
        }

        // 5. Directive-declared default.
        if let Some(default) = &var.default {
            bindings.insert(var.name.clone(), default.clone());
            continue;
        }

        // 6. Required but unresolved.
        if var.required {
            return Err(RunnerError::MissingVariable(var.name.clone()));
        }
    }

    Ok(bindings)
}

fn semantic_match(context: &ConstellationContext, patterns: &[String]) -> Option<String> {
    for pattern in patterns {
        let pattern = pattern.to_lowercase();
        for node_id in context.node_output_order() {
            if node_id.to_lowercase().contains(&pattern) {
                return context.node_outputs().get(node_id).map(|v| v.extract());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use constellation_stars::context::NodeOutputValue;
    use constellation_stars::TemplateVariable;
    use constellation_types::StarOutput;

    fn directive_with_var(var: TemplateVariable) -> Directive {
        Directive {
            id: "d".into(),
            name: "Directive".into(),
            description: String::new(),
            content: String::new(),
            template_variables: vec![var],
            probe_ids: vec![],
        }
    }

    fn empty_context() -> ConstellationContext {
        ConstellationContext::without_stream("run_x", "c", "", "", HashMap::new())
    }

    #[test]
    fn explicit_variable_wins_over_everything_else() {
        let mut ctx = empty_context();
        ctx.variables
            .insert("company_name".into(), Value::String("Tesla".into()));
        let directive = directive_with_var(TemplateVariable {
            name: "company_name".into(),
            description: None,
            required: true,
            default: None,
        });
        let bindings = resolve_bindings(&directive, &ctx, &HashMap::new()).unwrap();
        assert_eq!(bindings["company_name"], Value::String("Tesla".into()));
    }

    #[test]
    fn direct_node_id_match_is_used_when_no_explicit_variable() {
        let mut ctx = empty_context();
        ctx.record_node_output(
            "excel_parser",
            NodeOutputValue::Star(StarOutput::WorkerOutput {
                result: "parsed".into(),
                tool_calls: None,
            }),
        );
        let directive = directive_with_var(TemplateVariable {
            name: "excel_parser".into(),
            description: None,
            required: false,
            default: None,
        });
        let bindings = resolve_bindings(&directive, &ctx, &HashMap::new()).unwrap();
        assert_eq!(bindings["excel_parser"], Value::String("parsed".into()));
    }

    #[test]
    fn semantic_match_finds_node_id_containing_pattern_substring() {
        let mut ctx = empty_context();
        ctx.record_node_output(
            "node_excel_parser_1",
            NodeOutputValue::Text("structure data".into()),
        );
        let directive = directive_with_var(TemplateVariable {
            name: "structure_analysis".into(),
            description: None,
            required: true,
            default: None,
        });
        let semantic = crate::config::default_semantic_bindings();
        let bindings = resolve_bindings(&directive, &ctx, &semantic).unwrap();
        assert_eq!(
            bindings["structure_analysis"],
            Value::String("structure data".into())
        );
    }

    #[test]
    fn falls_back_to_most_recent_output_when_no_semantic_match() {
        let mut ctx = empty_context();
        ctx.record_node_output("first", NodeOutputValue::Text("one".into()));
        ctx.record_node_output("second", NodeOutputValue::Text("two".into()));
        let directive = directive_with_var(TemplateVariable {
            name: "unrelated_name".into(),
            description: None,
            required: true,
            default: None,
        });
        let bindings = resolve_bindings(&directive, &ctx, &HashMap::new()).unwrap();
        assert_eq!(bindings["unrelated_name"], Value::String("two".into()));
    }

    #[test]
    fn default_used_when_nothing_else_resolves() {
        let ctx = empty_context();
        let directive = directive_with_var(TemplateVariable {
            name: "tone".into(),
            description: None,
            required: false,
            default: Some(Value::String("neutral".into())),
        });
        let bindings = resolve_bindings(&directive, &ctx, &HashMap::new()).unwrap();
        assert_eq!(bindings["tone"], Value::String("neutral".into()));
    }

    #[test]
    fn required_variable_with_nothing_resolved_fails() {
        let ctx = empty_context();
        let directive = directive_with_var(TemplateVariable {
            name: "company_name".into(),
            description: None,
            required: true,
            default: None,
        });
        let err = resolve_bindings(&directive, &ctx, &HashMap::new()).unwrap_err();
        assert!(matches!(err, RunnerError::MissingVariable(name) if name == "company_name"));
    }

    #[test]
    fn resolution_is_deterministic_given_the_same_context() {
        let mut ctx = empty_context();
        ctx.record_node_output("a", NodeOutputValue::Text("out-a".into()));
        let directive = directive_with_var(TemplateVariable {
            name: "whatever".into(),
            description: None,
            required: true,
            default: None,
        });
        let first = resolve_bindings(&directive, &ctx, &HashMap::new()).unwrap();
        let second = resolve_bindings(&directive, &ctx, &HashMap::new()).unwrap();
        assert_eq!(first, second);
    }
}
