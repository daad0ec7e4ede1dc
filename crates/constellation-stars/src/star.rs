//! The Star contract (spec §6: "execute(context) -> StarOutput").

use async_trait::async_trait;
use constellation_types::StarOutput;
use thiserror::Error;

use crate::context::ConstellationContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StarType {
    Worker,
    Planning,
    Eval,
    Synthesis,
    DocEx,
    Other,
}

impl StarType {
    pub fn as_str(self) -> &'static str {
        match self {
            StarType::Worker => "worker",
            StarType::Planning => "planning",
            StarType::Eval => "eval",
            StarType::Synthesis => "synthesis",
            StarType::DocEx => "docex",
            StarType::Other => "other",
        }
    }
}

#[derive(Debug, Error)]
pub enum StarExecutionError {
    #[error("{0}")]
    Failed(String),
}

/// A Star: one node's unit of work. Implemented by callers outside this
/// crate — the LLM client façade and tool/probe registry are external
/// collaborators (spec §1), so this crate only defines the shape they
/// implement against.
#[async_trait]
pub trait Star: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn star_type(&self) -> StarType;
    fn directive_id(&self) -> &str;

    async fn execute(
        &self,
        context: &mut ConstellationContext,
    ) -> Result<StarOutput, StarExecutionError>;
}
