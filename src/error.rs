//! Error taxonomy for the triage pipeline.
//!
//! | Variant | Raised by | Caller sees |
//! |---------|-----------|-------------|
//! | [`InvalidInput`](CarelineError::InvalidInput) | entry validation, clients | validation error (HTTP 400, exit code 2) |
//! | [`Initialization`](CarelineError::Initialization) | startup wiring | fatal, process exits |
//! | [`Retrieval`](CarelineError::Retrieval) | [`crate::retrieval`] | wrapped in [`Processing`](CarelineError::Processing) |
//! | [`Generation`](CarelineError::Generation) | [`crate::generation`] | wrapped in [`Processing`](CarelineError::Processing) |
//! | [`Persistence`](CarelineError::Persistence) | [`crate::records`] | never; logged and swallowed by the orchestrator |

use thiserror::Error;

use crate::pipeline::Stage;

#[derive(Error, Debug)]
pub enum CarelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("failed to process query at stage '{stage}': {source}")]
    Processing {
        stage: Stage,
        #[source]
        source: Box<CarelineError>,
    },
}

impl CarelineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// True for errors the caller caused and can fix by changing the request.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Wrap a downstream component failure as a processing error for `stage`.
    pub fn at_stage(self, stage: Stage) -> Self {
        match self {
            already @ Self::Processing { .. } => already,
            other => Self::Processing {
                stage,
                source: Box::new(other),
            },
        }
    }
}

impl From<sqlx::Error> for CarelineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CarelineError>;
