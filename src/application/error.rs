//! Application-level errors (wraps domain errors)

use thiserror::Error;

use crate::domain::GrabError;

/// Application errors wrap domain errors and add application-level context.
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("{0}")]
    Domain(#[from] GrabError),

    #[error("config error: {message}")]
    Config { message: String },

    #[error("simulation failed: {message}")]
    Simulation { message: String },

    #[error("operation failed: {context}")]
    OperationFailed {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type for application layer operations.
pub type ApplicationResult<T> = Result<T, ApplicationError>;
