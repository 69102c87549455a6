//! Error types for the isy-stream crate.

use std::time::Duration;

/// Errors that can occur while running the controller event stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The secure channel to the controller could not be opened
    #[error("Failed to connect to event stream: {0}")]
    ConnectFailure(String),

    /// A frame arrived that is not a well-formed event document
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The controller stopped sending heartbeats
    #[error("Heartbeat timeout: {elapsed:?} since last heartbeat, expected every {wait:?}")]
    HeartbeatTimeout {
        /// Time since the last heartbeat (or since subscribe)
        elapsed: Duration,
        /// Interval the controller promised
        wait: Duration,
    },

    /// The controller closed the channel or the socket failed
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// A read or write was attempted while no channel is open
    #[error("Event stream channel is not open")]
    NotReady,

    /// An I/O error on the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A TLS negotiation or configuration error
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The background worker could not be started or has gone away
    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),
}

impl StreamError {
    /// Whether this error means the link to the controller is gone.
    ///
    /// Only these errors are escalated through the connection-lost callback;
    /// everything else is logged and absorbed by the watch loop.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            StreamError::ConnectFailure(_)
                | StreamError::ConnectionClosed(_)
                | StreamError::HeartbeatTimeout { .. }
        )
    }
}

/// Convenience type alias for Results using StreamError.
pub type Result<T> = std::result::Result<T, StreamError>;
