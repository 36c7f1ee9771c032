use clipflow_api::TransportError;
use clipflow_util::SlippageError;
use thiserror::Error;

use crate::clipboard::ClipboardError;

/// Everything that can go wrong while building or finalizing a workflow.
///
/// Every variant is fatal to the build that produced it. A failed build
/// leaves the workflow without build state.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("tag '{tag}' is already registered in workflow '{workflow}'")]
    DuplicateTag { workflow: String, tag: String },

    #[error("Tag does not exist: {tag}")]
    TagNotFound { tag: String },

    #[error("workflow '{workflow}' has not been built")]
    NotBuilt { workflow: String },

    #[error("workflow '{workflow}' has no steps to encode")]
    EmptySequence { workflow: String },

    #[error("'{step}' requires run data '{key}'")]
    MissingRunData { step: String, key: String },

    #[error("step '{step}' did not provide a call target")]
    MissingTarget { step: String },

    #[error(transparent)]
    Clipboard(#[from] ClipboardError),

    #[error(transparent)]
    Slippage(#[from] SlippageError),

    /// A generator's read-only simulation failed for good. `source` is set
    /// when the failure came from the transport.
    #[error("simulation failed: {message}")]
    Simulation {
        message: String,
        #[source]
        source: Option<TransportError>,
    },

    #[error("step '{step}' of workflow '{workflow}' failed: {source}")]
    StepFailed {
        workflow: String,
        step: String,
        #[source]
        source: Box<WorkflowError>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },
}

impl WorkflowError {
    pub fn simulation(message: impl Into<String>) -> Self {
        Self::Simulation {
            message: message.into(),
            source: None,
        }
    }

    /// Innermost error, skipping any `StepFailed` wrappers added by nesting.
    pub fn root_cause(&self) -> &WorkflowError {
        match self {
            Self::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
