use crate::environment::HookStage;
use crate::protocol::{TraitCondition, TraitId};

/// Failure of [`crate::Trait::configure`], optionally explaining itself with a condition
/// that is recorded in status before the pass aborts.
#[derive(Debug)]
pub struct ConfigureError {
    pub condition: Option<TraitCondition>,
    pub cause: anyhow::Error,
}

impl ConfigureError {
    pub fn with_condition(mut self, condition: TraitCondition) -> Self {
        self.condition = Some(condition);
        self
    }
}

impl From<anyhow::Error> for ConfigureError {
    fn from(cause: anyhow::Error) -> Self { Self { condition: None, cause } }
}

/// Failures of a pipeline pass. Trait-level causes keep the failing trait id.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("neither integration nor kit are set")]
    Structural,
    #[error("error creating trait environment: {0:#}")]
    Environment(anyhow::Error),
    #[error("invalid configuration for {id} trait: {cause:#}")]
    TraitConfig { id: TraitId, cause: anyhow::Error },
    #[error("{id} trait configuration failed: {cause:#}")]
    Configuration { id: TraitId, cause: anyhow::Error },
    #[error("{id} trait execution failed: {cause:#}")]
    Execution { id: TraitId, cause: anyhow::Error },
    #[error("{id} trait executing post step action failed: {cause:#}")]
    PostStep { id: TraitId, cause: anyhow::Error },
    #[error("no trait can be executed because of no ready platform found")]
    NoApplicableTrait,
    #[error("error executing {stage} - {failed}/{total} failed: [{}]", join_errors(.errors))]
    Hooks { stage: HookStage, failed: usize, total: usize, errors: Vec<anyhow::Error> },
    #[error("synthetic environment requires an integration")]
    MissingIntegration,
    #[error("cannot create a synthetic environment for {0} kind")]
    UnsupportedImportedKind(String),
    #[error("error fetching imported workload: {0:#}")]
    Workload(anyhow::Error),
}

impl PipelineError {
    /// Trait the failure is attributed to, if any.
    pub fn trait_id(&self) -> Option<&TraitId> {
        match self {
            PipelineError::TraitConfig { id, .. }
            | PipelineError::Configuration { id, .. }
            | PipelineError::Execution { id, .. }
            | PipelineError::PostStep { id, .. } => Some(id),
            _ => None,
        }
    }
}

fn join_errors(errors: &[anyhow::Error]) -> String {
    errors.iter().map(|e| format!("{:#}", e)).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("trait {0} is already registered")]
    Duplicate(String),
}
