//! Public types for the gate connection manager.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use gate_protocol::GateAction;
use gate_protocol::constants::{HEARTBEAT_TIMEOUT, KEEP_ALIVE};

use crate::error::GateError;
use crate::lifecycle::LifecycleSignal;

/// Lifecycle state of the broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session. Initial state, and terminal after logout.
    Disconnected,
    /// User-initiated connection attempt in progress.
    Connecting,
    /// Connected and authenticated.
    Connected,
    /// Automatic connection attempt triggered by a lifecycle signal.
    Reconnecting,
    /// Tearing down after an explicit logout.
    LoggingOut,
}

impl ConnectionState {
    /// Returns `true` while an attempt is outstanding.
    pub fn is_attempting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

/// Who started a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOrigin {
    User,
    Automatic,
}

/// Snapshot of the live session handed to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub username: String,
    pub origin: AttemptOrigin,
}

/// Outcome of a correlated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    Failure(String),
}

/// Handle to an issued command.
///
/// The outcome resolves when the device answers. It never resolves if the
/// session is torn down or the command expires first.
#[derive(Debug)]
pub struct CommandTicket {
    pub token: String,
    pub action: GateAction,
    pub(crate) outcome: oneshot::Receiver<CommandOutcome>,
}

impl CommandTicket {
    /// Waits for the correlated outcome. `None` if the command was discarded.
    pub async fn outcome(self) -> Option<CommandOutcome> {
        self.outcome.await.ok()
    }
}

/// Events emitted by the connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Session state changed.
    StateChanged(ConnectionState),
    /// Human-readable status line for the UI.
    Status(String),
    /// A lifecycle signal started an automatic attempt.
    ReconnectRequested(LifecycleSignal),
    /// A network-class failure is being retried.
    Retrying { attempt: u32, delay: Duration },
    /// An operation failed.
    Failure(GateError),
    /// A command was published.
    CommandSent {
        token: String,
        action: GateAction,
        wire_action: GateAction,
    },
    /// The device answered a pending command.
    CommandResolved {
        token: String,
        action: GateAction,
        outcome: CommandOutcome,
    },
    /// A pending command received no answer in time.
    CommandExpired { token: String, action: GateAction },
    /// A heartbeat arrived. `remote_time` is the device's own stamp.
    Heartbeat { remote_time: Option<DateTime<Utc>> },
    /// The device online verdict flipped.
    LivenessChanged { online: bool },
}

/// Bounded retry and watchdog policy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Extra attempts after a network-class failure.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
    /// Clears a stuck automatic attempt back to `Disconnected`.
    pub watchdog: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_secs(2),
            watchdog: Duration::from_secs(10),
        }
    }
}

/// Runtime configuration of the [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub keep_alive: Duration,
    /// Upper bound on a single transport connect.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
    pub heartbeat_timeout: Duration,
    /// Interval of the liveness and command-expiry tick.
    pub poll_interval: Duration,
    /// Pending commands older than this are expired.
    pub command_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            keep_alive: KEEP_ALIVE,
            connect_timeout: Duration::from_secs(5),
            reconnect: ReconnectConfig::default(),
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            poll_interval: Duration::from_secs(5),
            command_timeout: Duration::from_secs(30),
        }
    }
}
