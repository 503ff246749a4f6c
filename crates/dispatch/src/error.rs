use thiserror::Error;

/// Result type for dispatch operations that can fail outright
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors surfaced by configuration and the async service.
///
/// Registration and resolution never return these: bad triggers are dropped
/// and logged, see [`crate::Registration`].
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The service task is gone (shut down or panicked)
    #[error("Dispatch service stopped")]
    ServiceStopped,
}

impl DispatchError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// Failure to build a matcher from composed sources.
///
/// Kept internal to the registry: a failed compile keeps the previous matcher.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("regex error: {0}")]
    Linear(#[from] regex::Error),

    #[error("regex error: {0}")]
    Backtracking(#[from] fancy_regex::Error),

    #[error("no pattern sources to compile")]
    Empty,
}
