//! Transport seam between the manager and a publish/subscribe broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use gate_protocol::{InboundMessage, OutboundMessage, QoS};

use crate::error::FailureKind;

/// Errors from the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timed out")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Classifies the error for retry decisions.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::AuthRejected(_) => FailureKind::Auth,
            Self::Network(_) | Self::Timeout | Self::NotConnected => FailureKind::Network,
            Self::Other(_) => FailureKind::Unknown,
        }
    }
}

/// Parameters of one connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Unique per attempt.
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    /// Delivered by the broker if this session drops uncleanly.
    pub will: Option<OutboundMessage>,
}

/// Events produced by a live link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Message(InboundMessage),
    /// The link is gone. No further events follow.
    Closed { reason: String },
}

/// An acknowledged session: the link plus its inbound event stream.
pub struct Established {
    pub link: Arc<dyn Link>,
    pub events: mpsc::Receiver<LinkEvent>,
}

/// Opens broker sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects and resolves once the broker acknowledged the session.
    async fn connect(&self, options: SessionOptions) -> Result<Established, TransportError>;
}

/// A live broker session.
#[async_trait]
pub trait Link: Send + Sync {
    fn client_id(&self) -> &str;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError>;

    /// Graceful disconnect. The will message is not delivered.
    async fn disconnect(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(
            TransportError::AuthRejected("x".into()).kind(),
            FailureKind::Auth
        );
        assert_eq!(TransportError::Timeout.kind(), FailureKind::Network);
        assert_eq!(TransportError::NotConnected.kind(), FailureKind::Network);
        assert_eq!(
            TransportError::Network("reset".into()).kind(),
            FailureKind::Network
        );
        assert_eq!(TransportError::Other("x".into()).kind(), FailureKind::Unknown);
    }

    #[test]
    fn error_display() {
        assert_eq!(TransportError::Timeout.to_string(), "timed out");
        assert_eq!(TransportError::NotConnected.to_string(), "not connected");
        assert!(
            TransportError::AuthRejected("bad user name or password".into())
                .to_string()
                .contains("bad user name")
        );
    }
}
