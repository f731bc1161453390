use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur during `rtpmidi` operations
#[derive(Debug, Error)]
pub enum RtpMidiError {
    /// Failed to bind a session socket
    ///
    /// Bind failures are fatal for `Session::start`.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that could not be bound
        addr: SocketAddr,
        /// The underlying socket error
        #[source]
        source: io::Error,
    },

    /// Network I/O error
    #[error("network error: {0}")]
    Network(#[from] io::Error),

    /// mDNS discovery failed
    #[error("discovery failed: {message}")]
    DiscoveryFailed {
        /// Description of the failure
        message: String,
    },

    /// Operation not valid in current state
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the state is invalid
        message: String,
    },

    /// The session actor has shut down
    #[error("session closed")]
    SessionClosed,
}

impl RtpMidiError {
    /// Check if this error is fatal for the session as a whole
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::SessionClosed)
    }
}

/// Result type alias for `rtpmidi` operations
pub type Result<T> = std::result::Result<T, RtpMidiError>;
