//! Error types for isy-state

use isy_stream::StreamError;

/// Result type for isy-state operations
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors that can occur while tracking controller state
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The controller refused or failed a scene command
    #[error("Scene command '{command}' for {scene} failed: {reason}")]
    SceneCommand {
        scene: String,
        command: &'static str,
        reason: String,
    },

    /// A status event carried a value that is not an integer
    #[error("Invalid status value for node {node}: {value}")]
    InvalidStatus { node: String, value: String },

    /// A status event without a node address
    #[error("Status event without node address")]
    MissingNode,

    /// Error from the event stream
    #[error("Event stream error: {0}")]
    Stream(#[from] StreamError),
}
