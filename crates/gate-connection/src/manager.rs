//! Connection manager owning the single broker session.
//!
//! Establishes and tears down the session, publishes commands and
//! correlates their responses, tracks device liveness, and reconnects on
//! host lifecycle signals when credentials are remembered.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gate_protocol::{
    ClientPresence, CommandRequest, GateAction, OutboundMessage, TOPIC_CLIENTS, TOPIC_CONTROL,
    ViewingSide, response_topic,
};

use crate::credentials::{CredentialError, CredentialStore, CredentialsRecord};
use crate::error::GateError;
use crate::lifecycle::LifecycleSignal;
use crate::reconnection::{
    SessionContext, Shared, begin_attempt, establish, request_reconnect, teardown_locked,
};
use crate::transport::Connector;
use crate::types::{
    AttemptOrigin, CommandTicket, ConnectionEvent, ConnectionState, ManagerConfig, SessionInfo,
};

/// Connection and command lifecycle manager.
pub struct ConnectionManager {
    ctx: SessionContext,
    events_rx: tokio::sync::Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
    /// Serializes publishes so commands leave in call order.
    publish_order: tokio::sync::Mutex<()>,
}

impl ConnectionManager {
    /// Creates a manager. The remember flag starts from the stored record.
    pub fn new(
        config: ManagerConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        let remember = match CredentialsRecord::load(store.as_ref()) {
            Ok(record) => record.remember,
            Err(e) => {
                warn!("cannot read stored credentials: {e}");
                false
            }
        };
        let shared = Shared::new(&config, remember, ViewingSide::default());

        Self {
            ctx: SessionContext {
                shared: Arc::new(Mutex::new(shared)),
                connector,
                store,
                events_tx,
                config,
                shutdown: CancellationToken::new(),
            },
            events_rx: tokio::sync::Mutex::new(Some(events_rx)),
            publish_order: tokio::sync::Mutex::new(()),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.events_rx.lock().await.take()
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.lock().state
    }

    /// The session being attempted or live, if any.
    pub fn session(&self) -> Option<SessionInfo> {
        self.ctx.lock().session.as_ref().map(|s| SessionInfo {
            session_id: s.id.clone(),
            username: s.username.clone(),
            origin: s.origin,
        })
    }

    /// Whether the device sent a heartbeat within the liveness timeout.
    pub fn is_online(&self) -> bool {
        self.ctx.lock().liveness.is_online()
    }

    /// Device-reported time of the last heartbeat.
    pub fn last_heartbeat(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.ctx.lock().liveness.remote_time()
    }

    /// Number of commands awaiting a response.
    pub fn pending_commands(&self) -> usize {
        self.ctx.lock().registry.len()
    }

    pub fn last_disconnect_reason(&self) -> Option<String> {
        self.ctx.lock().last_disconnect.clone()
    }

    pub fn remember(&self) -> bool {
        self.ctx.lock().remember
    }

    /// Reads the persisted credentials record.
    pub fn stored_credentials(&self) -> Result<CredentialsRecord, CredentialError> {
        CredentialsRecord::load(self.ctx.store.as_ref())
    }

    pub fn viewing_side(&self) -> ViewingSide {
        self.ctx.lock().side
    }

    pub fn set_viewing_side(&self, side: ViewingSide) {
        self.ctx.lock().side = side;
        debug!(?side, "viewing side set");
    }

    /// Flips the viewing side and returns the new one.
    pub fn toggle_viewing_side(&self) -> ViewingSide {
        let mut s = self.ctx.lock();
        s.side = s.side.toggled();
        s.side
    }

    /// Sets the remember preference.
    ///
    /// Turning it off clears the stored credentials immediately. Turning it
    /// on while connected stores the live session's credentials.
    pub fn set_remember(&self, remember: bool) {
        let save = {
            let mut s = self.ctx.lock();
            s.remember = remember;
            match (&s.session, s.state) {
                (Some(session), ConnectionState::Connected) if remember => {
                    Some(CredentialsRecord {
                        username: session.username.clone(),
                        password: session.password.clone(),
                        remember: true,
                    })
                }
                _ => None,
            }
        };

        let result = match save {
            Some(record) => record.save(self.ctx.store.as_ref()),
            None if !remember => CredentialsRecord::forget(self.ctx.store.as_ref()),
            None => Ok(()),
        };
        if let Err(e) = result {
            warn!("failed to update stored credentials: {e}");
        }
    }

    /// Connects with the given credentials, replacing any existing session.
    ///
    /// Fails with [`GateError::MissingCredentials`] without touching the
    /// current session if either field is empty. Returns
    /// [`GateError::Superseded`] if another connect or a logout took over
    /// before this attempt settled.
    pub async fn connect(&self, username: &str, password: &str) -> Result<SessionInfo, GateError> {
        if username.is_empty() || password.is_empty() {
            let err = GateError::MissingCredentials;
            self.ctx.status(err.status_text());
            self.ctx.emit(ConnectionEvent::Failure(err.clone()));
            return Err(err);
        }

        let (ticket, old_link) = {
            let mut s = self.ctx.lock();
            begin_attempt(
                &self.ctx,
                &mut s,
                AttemptOrigin::User,
                username.to_string(),
                password.to_string(),
            )
        };
        if let Some(link) = old_link {
            debug!(client = %link.client_id(), "closing previous session");
            link.disconnect().await;
        }
        establish(&self.ctx, ticket).await
    }

    /// Publishes a command and registers it for correlation.
    ///
    /// `action` is the operator's view. When viewing from outside, left and
    /// right are swapped on the wire.
    pub async fn send_command(&self, action: GateAction) -> Result<CommandTicket, GateError> {
        let _order = self.publish_order.lock().await;

        let prepared = {
            let mut s = self.ctx.lock();
            let live = match (&s.link, &s.session, s.state) {
                (Some(link), Some(session), ConnectionState::Connected) => {
                    Some((link.clone(), session.id.clone()))
                }
                _ => None,
            };
            live.map(|(link, session_id)| {
                let wire = action.for_side(s.side);
                let (token, outcome) = s.registry.issue(action);
                (link, session_id, wire, token, outcome)
            })
        };
        let Some((link, session_id, wire, token, outcome)) = prepared else {
            return Err(self.publish_failed("Not connected", "Not connected".into()));
        };

        let message = match OutboundMessage::json(TOPIC_CONTROL, &CommandRequest::new(wire)) {
            Ok(m) => m.with_reply(response_topic(&session_id), &token),
            Err(e) => {
                self.ctx.lock().registry.discard(&token);
                let err = GateError::PublishFailure(e.to_string());
                return Err(self.publish_failed(&err.status_text(), e.to_string()));
            }
        };

        if let Err(e) = link.publish(message).await {
            self.ctx.lock().registry.discard(&token);
            let err = GateError::PublishFailure(e.to_string());
            return Err(self.publish_failed(&err.status_text(), e.to_string()));
        }

        info!(%action, %wire, %token, "command sent");
        self.ctx.emit(ConnectionEvent::CommandSent {
            token: token.clone(),
            action,
            wire_action: wire,
        });
        self.ctx.status(format!("Sent: {wire}"));
        Ok(CommandTicket {
            token,
            action,
            outcome,
        })
    }

    fn publish_failed(&self, status: &str, reason: String) -> GateError {
        warn!(%reason, "command not sent");
        let err = GateError::PublishFailure(reason);
        self.ctx.status(status);
        self.ctx.emit(ConnectionEvent::Failure(err.clone()));
        err
    }

    /// Feeds a host lifecycle signal. Returns `true` if a reconnect started.
    ///
    /// Must be called within a Tokio runtime.
    pub fn handle_lifecycle(&self, signal: LifecycleSignal) -> bool {
        request_reconnect(&self.ctx, signal)
    }

    /// Ends the session from any state.
    ///
    /// Announces the departure, tears down locally without waiting for
    /// in-flight acknowledgements, and clears stored credentials unless
    /// remember is set.
    pub async fn logout(&self) {
        let (link, session_id, remember) = {
            let mut s = self.ctx.lock();
            self.ctx.set_state(&mut s, ConnectionState::LoggingOut);
            s.reconnect_outstanding = false;
            let session_id = s.session.as_ref().map(|session| session.id.clone());
            let link = teardown_locked(&mut s);
            s.liveness.reset();
            (link, session_id, s.remember)
        };

        if let Some(link) = link {
            if let Some(id) = session_id {
                match OutboundMessage::json(TOPIC_CLIENTS, &ClientPresence::offline(id)) {
                    Ok(notice) => {
                        if let Err(e) = link.publish(notice).await {
                            debug!("failed to publish offline notice: {e}");
                        }
                    }
                    Err(e) => debug!("failed to encode offline notice: {e}"),
                }
            }
            link.disconnect().await;
        }

        if !remember && let Err(e) = CredentialsRecord::forget(self.ctx.store.as_ref()) {
            warn!("failed to clear stored credentials: {e}");
        }

        {
            let mut s = self.ctx.lock();
            if s.state == ConnectionState::LoggingOut {
                self.ctx.set_state(&mut s, ConnectionState::Disconnected);
            }
        }
        self.ctx.status("Logged out");
        info!("logged out");
    }

    /// Shuts the manager down. No further reconnects are started.
    pub async fn shutdown(&self) {
        self.ctx.shutdown.cancel();
        let link = {
            let mut s = self.ctx.lock();
            s.reconnect_outstanding = false;
            let link = teardown_locked(&mut s);
            self.ctx.set_state(&mut s, ConnectionState::Disconnected);
            link
        };
        if let Some(link) = link {
            link.disconnect().await;
        }
        info!("connection manager shut down");
    }
}
