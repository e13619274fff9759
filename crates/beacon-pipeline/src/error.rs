//! Pipeline error types.

use thiserror::Error;

/// Pipeline error type.
///
/// The dispatch surface rejects only for `Validation`; delivery problems
/// resolve through the returned context instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed call arguments, detected before dispatch
    #[error("Validation error: {0}")]
    Validation(String),

    /// Plugin load failed at registration
    #[error("Plugin load failed: {plugin}: {message}")]
    PluginLoad { plugin: String, message: String },

    /// No plugin registered under this name
    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),
}

/// Result type alias using PipelineError.
pub type PipelineResult<T> = Result<T, PipelineError>;
