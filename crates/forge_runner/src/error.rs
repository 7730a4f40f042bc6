//! Error types for the automation driver.

use thiserror::Error;

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors that can occur while scripting the external tool.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Failed to start tool session: {0}")]
    StartFailed(String),

    #[error("Failed to send prompt to tool: {0}")]
    PromptSend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
