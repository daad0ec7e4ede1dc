//! The Star Execution Adapter (C4): resolves a Star and Directive, invokes
//! the Star, and normalizes its result (spec §4.4). Variable binding
//! (§4.5) is the Runner's responsibility (`constellation-runtime`), since it
//! needs the Constellation graph this crate does not depend on.

use thiserror::Error;

use constellation_types::{normalize_output, NormalizedOutput, StarOutput};

use crate::context::ConstellationContext;
use crate::registry::{DirectiveRegistry, StarRegistry};
use crate::star::{Star, StarExecutionError};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Star '{0}' not found")]
    StarNotFound(String),
    #[error("{0}")]
    StarFailed(String),
}

impl From<StarExecutionError> for AdapterError {
    fn from(value: StarExecutionError) -> Self {
        match value {
            StarExecutionError::Failed(msg) => AdapterError::StarFailed(msg),
        }
    }
}

/// Resolves `star_id`, invoking the Star. Directive resolution for variable
/// bindings happens in the Runner, which calls `DirectiveRegistry::get`
/// directly — this helper only covers Star resolution + invocation +
/// output normalization, the parts that don't need the graph.
pub async fn resolve_star(
    stars: &StarRegistry,
    star_id: &str,
) -> Result<std::sync::Arc<dyn Star>, AdapterError> {
    stars
        .get(star_id)
        .await
        .ok_or_else(|| AdapterError::StarNotFound(star_id.to_string()))
}

pub async fn invoke_star(
    star: &dyn Star,
    context: &mut ConstellationContext,
) -> Result<StarOutput, AdapterError> {
    let output = star.execute(context).await?;
    Ok(output)
}

pub fn normalize(output: &StarOutput, tool_result_truncate_at: usize) -> NormalizedOutput {
    normalize_output(output, tool_result_truncate_at)
}

/// Convenience re-export so callers that only have `directives` in scope
/// don't need to depend on this crate's internal module layout.
pub async fn directive_for_star(
    directives: &DirectiveRegistry,
    star: &dyn Star,
) -> Option<crate::directive::Directive> {
    directives.get(star.directive_id()).await
}
