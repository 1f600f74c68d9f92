//! Connection and command lifecycle manager for the gate remote.
//!
//! Owns the single broker session, its reconnection policy, command
//! correlation, and device liveness tracking.

pub mod config;
pub mod correlation;
pub mod credentials;
pub mod error;
pub mod lifecycle;
pub mod liveness;
pub mod manager;
pub mod memory;
pub mod mqtt_client;
mod pumps;
pub(crate) mod reconnection;
pub mod transport;
pub mod types;

pub use config::{BrokerConfig, ConfigError, GateConfig};
pub use correlation::{CorrelationRegistry, PendingCommand};
pub use credentials::{
    CredentialError, CredentialKey, CredentialStore, CredentialsRecord, FileCredentialStore,
    MemoryCredentialStore,
};
pub use error::{FailureKind, GateError};
pub use lifecycle::LifecycleSignal;
pub use liveness::LivenessMonitor;
pub use manager::ConnectionManager;
pub use memory::{ConnectBehavior, MemoryBroker};
pub use mqtt_client::MqttConnector;
pub use transport::{Connector, Established, Link, LinkEvent, SessionOptions, TransportError};
pub use types::{
    AttemptOrigin, CommandOutcome, CommandTicket, ConnectionEvent, ConnectionState,
    ManagerConfig, ReconnectConfig, SessionInfo,
};
