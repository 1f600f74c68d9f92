//! Failure taxonomy surfaced by the connection manager.

use crate::transport::TransportError;

/// Coarse class of a transport failure, used to pick a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credentials refused. Never retried automatically.
    Auth,
    /// Network or timeout. Retried a bounded number of times.
    Network,
    Unknown,
}

/// Errors returned by [`ConnectionManager`](crate::ConnectionManager) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("username and password are required")]
    MissingCredentials,

    #[error("authentication rejected: {0}")]
    AuthenticationRejected(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("publish failed: {0}")]
    PublishFailure(String),

    #[error("setup failed: {0}")]
    SetupFailure(String),

    /// A newer connect or a logout cancelled this attempt.
    #[error("connection attempt superseded")]
    Superseded,
}

impl GateError {
    /// Maps a failed connect onto the taxonomy.
    pub fn from_connect(err: &TransportError) -> Self {
        match err.kind() {
            FailureKind::Auth => Self::AuthenticationRejected(err.to_string()),
            FailureKind::Network => Self::TransportFailure(err.to_string()),
            FailureKind::Unknown => Self::SetupFailure(err.to_string()),
        }
    }

    /// Status line shown to the user.
    pub fn status_text(&self) -> String {
        match self {
            Self::MissingCredentials => "Please enter both username and password".into(),
            Self::AuthenticationRejected(_) => {
                "Connection failed: username or password rejected".into()
            }
            Self::TransportFailure(msg) => format!("Connection failed: {msg}"),
            Self::PublishFailure(msg) => format!("Error: {msg}"),
            Self::SetupFailure(msg) => format!("Setup Error: {msg}"),
            Self::Superseded => "Connection cancelled".into(),
        }
    }
}
