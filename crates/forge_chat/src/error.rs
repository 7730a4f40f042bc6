//! Error types for the conversation pipeline.

use thiserror::Error;

/// Result type alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Errors that can occur in the conversation pipeline.
///
/// Analysis and page failures are recovered internally and never reach the
/// transport; the remaining variants describe generation-step failures the
/// controller renders as structured replies.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Page analysis failed: {0}")]
    PageAnalysis(String),

    #[error("Could not start the automation tool: {0}")]
    AutomationStart(String),

    #[error("Could not send the prompt to the automation tool: {0}")]
    PromptSend(String),

    #[error("The automation tool produced no artifact")]
    ArtifactNotFound,

    #[error("Generation exceeded its time budget")]
    GenerationTimeout,

    #[error("Generated artifact failed to run: {0}")]
    Execution(String),

    #[error("Chat transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
