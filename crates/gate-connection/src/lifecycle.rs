//! Host lifecycle signals and the reconnect guard.

use std::fmt;

use crate::credentials::CredentialsRecord;
use crate::types::ConnectionState;

/// A host runtime signal that may warrant reconnecting.
///
/// All variants are handled identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    AppBecameVisible,
    /// Mobile foreground.
    AppBecameActive,
    WindowGainedFocus,
    TransportClosedUnexpectedly,
}

impl fmt::Display for LifecycleSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AppBecameVisible => "app became visible",
            Self::AppBecameActive => "app became active",
            Self::WindowGainedFocus => "window gained focus",
            Self::TransportClosedUnexpectedly => "transport closed unexpectedly",
        })
    }
}

/// Why a lifecycle signal did not start a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SkipReason {
    NotDisconnected,
    AlreadyReconnecting,
    NotRemembered,
    IncompleteCredentials,
}

/// Decides whether a lifecycle signal may start an automatic attempt.
pub(crate) fn reconnect_decision(
    state: ConnectionState,
    reconnect_outstanding: bool,
    stored: &CredentialsRecord,
) -> Result<(), SkipReason> {
    if reconnect_outstanding {
        return Err(SkipReason::AlreadyReconnecting);
    }
    if state != ConnectionState::Disconnected {
        return Err(SkipReason::NotDisconnected);
    }
    if !stored.remember {
        return Err(SkipReason::NotRemembered);
    }
    if !stored.is_complete() {
        return Err(SkipReason::IncompleteCredentials);
    }
    Ok(())
}
