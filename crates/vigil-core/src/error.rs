use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VigilError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("change set too large: {count} identifiers (ceiling {ceiling})")]
    ChangeSetTooLarge { count: usize, ceiling: usize },

    #[error("resolution query failed: {0}")]
    ResolutionQueryFailed(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("engine is shut down")]
    ShutDown,

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl VigilError {
    /// Whether publishing this error downstream must replace the incremental
    /// update with a full reset. Resolution failures and overflow always do;
    /// they are captured on the in-flight change set rather than propagated.
    pub fn forces_reset(&self) -> bool {
        matches!(
            self,
            VigilError::ChangeSetTooLarge { .. } | VigilError::ResolutionQueryFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VigilError>;

// Custom Error Types:
//
// Vigil supports custom error types through the `#[from] anyhow::Error`
// variant. Any error implementing `std::error::Error + Send + Sync + 'static`
// can be converted to `VigilError::Other`, which lets write-transaction
// closures return application errors without their own mapping boilerplate.
