//! Session establishment, teardown and automatic reconnection.
//!
//! Contains the shared [`SessionContext`], the generation-guarded attempt
//! lifecycle, and the lifecycle-signal reconnect path with its watchdog.
//!
//! Every attempt is stamped with the generation current when it began.
//! Teardown bumps the generation, so any completion, failure or inbound
//! event carrying an older stamp is ignored.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gate_protocol::constants::SESSION_ID_PREFIX;
use gate_protocol::{
    ClientPresence, OutboundMessage, QoS, TOPIC_CLIENTS, TOPIC_STATUS, ViewingSide, response_topic,
};

use crate::correlation::CorrelationRegistry;
use crate::credentials::{CredentialStore, CredentialsRecord};
use crate::error::{FailureKind, GateError};
use crate::lifecycle::{LifecycleSignal, reconnect_decision};
use crate::liveness::LivenessMonitor;
use crate::transport::{Connector, Established, Link, SessionOptions, TransportError};
use crate::types::{AttemptOrigin, ConnectionEvent, ConnectionState, ManagerConfig, SessionInfo};

/// The session currently attempted or live.
#[derive(Clone)]
pub(crate) struct ActiveSession {
    pub(crate) id: String,
    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) origin: AttemptOrigin,
}

/// All mutable manager state, behind one exclusive lock.
///
/// The lock is never held across an await.
pub(crate) struct Shared {
    pub(crate) state: ConnectionState,
    pub(crate) generation: u64,
    pub(crate) session: Option<ActiveSession>,
    pub(crate) link: Option<Arc<dyn Link>>,
    pub(crate) session_cancel: Option<CancellationToken>,
    pub(crate) reconnect_outstanding: bool,
    pub(crate) registry: CorrelationRegistry,
    pub(crate) liveness: LivenessMonitor,
    pub(crate) remember: bool,
    pub(crate) side: ViewingSide,
    pub(crate) last_disconnect: Option<String>,
}

impl Shared {
    pub(crate) fn new(config: &ManagerConfig, remember: bool, side: ViewingSide) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            generation: 0,
            session: None,
            link: None,
            session_cancel: None,
            reconnect_outstanding: false,
            registry: CorrelationRegistry::new(),
            liveness: LivenessMonitor::new(config.heartbeat_timeout),
            remember,
            side,
            last_disconnect: None,
        }
    }
}

/// Shared handles passed to spawned tasks. Cheap to clone.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub(crate) shared: Arc<Mutex<Shared>>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) store: Arc<dyn CredentialStore>,
    pub(crate) events_tx: mpsc::Sender<ConnectionEvent>,
    pub(crate) config: ManagerConfig,
    pub(crate) shutdown: CancellationToken,
}

impl SessionContext {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emits an event without waiting. Dropped if nobody drains the channel.
    pub(crate) fn emit(&self, event: ConnectionEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            debug!("connection event dropped: {e}");
        }
    }

    pub(crate) fn status(&self, text: impl Into<String>) {
        self.emit(ConnectionEvent::Status(text.into()));
    }

    /// Updates the state, emitting `StateChanged` if it differs.
    pub(crate) fn set_state(&self, shared: &mut Shared, state: ConnectionState) {
        if shared.state == state {
            return;
        }
        debug!(from = ?shared.state, to = ?state, "connection state changed");
        shared.state = state;
        self.emit(ConnectionEvent::StateChanged(state));
    }
}

/// Identity of one attempt, checked against the current generation.
pub(crate) struct AttemptTicket {
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) origin: AttemptOrigin,
    pub(crate) username: String,
    pub(crate) password: String,
}

/// Generates a fresh session identifier.
pub(crate) fn new_session_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{SESSION_ID_PREFIX}{}", &hex[..8])
}

/// Invalidates the current session: cancels its tasks, bumps the
/// generation, and drops every pending command.
///
/// Returns the old link so the caller can disconnect it outside the lock.
pub(crate) fn teardown_locked(shared: &mut Shared) -> Option<Arc<dyn Link>> {
    if let Some(cancel) = shared.session_cancel.take() {
        cancel.cancel();
    }
    shared.generation += 1;
    let dropped = shared.registry.drop_all();
    if dropped > 0 {
        debug!(dropped, "discarded pending commands");
    }
    shared.session = None;
    shared.link.take()
}

/// Tears down whatever exists and starts a new attempt.
pub(crate) fn begin_attempt(
    ctx: &SessionContext,
    shared: &mut Shared,
    origin: AttemptOrigin,
    username: String,
    password: String,
) -> (AttemptTicket, Option<Arc<dyn Link>>) {
    let old_link = teardown_locked(shared);
    let cancel = ctx.shutdown.child_token();
    shared.session_cancel = Some(cancel.clone());
    shared.reconnect_outstanding = origin == AttemptOrigin::Automatic;
    let (state, status) = match origin {
        AttemptOrigin::User => (ConnectionState::Connecting, "Connecting..."),
        AttemptOrigin::Automatic => (ConnectionState::Reconnecting, "Reconnecting..."),
    };
    ctx.set_state(shared, state);
    ctx.status(status);

    let ticket = AttemptTicket {
        generation: shared.generation,
        cancel,
        origin,
        username,
        password,
    };
    (ticket, old_link)
}

/// Runs an attempt to completion: connect with bounded retry, then
/// subscribe and go live.
pub(crate) async fn establish(
    ctx: &SessionContext,
    ticket: AttemptTicket,
) -> Result<SessionInfo, GateError> {
    let retry = &ctx.config.reconnect;
    let mut retries: u32 = 0;

    loop {
        let session_id = new_session_id();
        {
            let mut s = ctx.lock();
            if s.generation != ticket.generation {
                return Err(GateError::Superseded);
            }
            s.session = Some(ActiveSession {
                id: session_id.clone(),
                username: ticket.username.clone(),
                password: ticket.password.clone(),
                origin: ticket.origin,
            });
        }

        let will = match OutboundMessage::json(TOPIC_CLIENTS, &ClientPresence::offline(&session_id))
        {
            Ok(will) => will,
            Err(e) => return Err(fail_attempt(ctx, &ticket, GateError::SetupFailure(e.to_string()))),
        };
        let options = SessionOptions {
            client_id: session_id.clone(),
            username: ticket.username.clone(),
            password: ticket.password.clone(),
            keep_alive: ctx.config.keep_alive,
            will: Some(will),
        };

        info!(session = %session_id, origin = ?ticket.origin, "connecting");
        let result = tokio::select! {
            biased;
            _ = ticket.cancel.cancelled() => {
                debug!(session = %session_id, "connect attempt cancelled");
                return Err(GateError::Superseded);
            }
            r = tokio::time::timeout(ctx.config.connect_timeout, ctx.connector.connect(options)) => {
                r.unwrap_or(Err(TransportError::Timeout))
            }
        };

        let err = match result {
            Ok(established) => return finish_connect(ctx, &ticket, session_id, established).await,
            Err(e) => e,
        };

        if err.kind() == FailureKind::Network && retries < retry.max_retries {
            retries += 1;
            warn!(
                session = %session_id,
                attempt = retries,
                error = %err,
                "connect failed, retrying"
            );
            ctx.emit(ConnectionEvent::Retrying {
                attempt: retries,
                delay: retry.backoff,
            });
            tokio::select! {
                biased;
                _ = ticket.cancel.cancelled() => return Err(GateError::Superseded),
                _ = tokio::time::sleep(retry.backoff) => {}
            }
            continue;
        }

        return Err(fail_attempt(ctx, &ticket, GateError::from_connect(&err)));
    }
}

/// Settles a failed attempt back to `Disconnected` if it is still current.
fn fail_attempt(ctx: &SessionContext, ticket: &AttemptTicket, err: GateError) -> GateError {
    let mut s = ctx.lock();
    if s.generation != ticket.generation {
        return GateError::Superseded;
    }
    if let Some(cancel) = s.session_cancel.take() {
        cancel.cancel();
    }
    s.session = None;
    s.reconnect_outstanding = false;
    s.last_disconnect = Some(err.to_string());
    ctx.set_state(&mut s, ConnectionState::Disconnected);

    match ticket.origin {
        AttemptOrigin::User => {
            warn!(error = %err, "connect failed");
            ctx.status(err.status_text());
            ctx.emit(ConnectionEvent::Failure(err.clone()));
        }
        AttemptOrigin::Automatic => {
            warn!(error = %err, "automatic reconnect failed");
            ctx.status("Disconnected");
        }
    }
    err
}

/// Subscribes the new session and publishes it as the live one.
async fn finish_connect(
    ctx: &SessionContext,
    ticket: &AttemptTicket,
    session_id: String,
    established: Established,
) -> Result<SessionInfo, GateError> {
    let Established { link, events } = established;

    for topic in [TOPIC_STATUS.to_string(), response_topic(&session_id)] {
        if let Err(e) = link.subscribe(&topic, QoS::AtLeastOnce).await {
            link.disconnect().await;
            return Err(fail_attempt(ctx, ticket, GateError::from_connect(&e)));
        }
    }

    let live = {
        let mut s = ctx.lock();
        if s.generation != ticket.generation || ticket.cancel.is_cancelled() {
            None
        } else {
            s.link = Some(link.clone());
            s.reconnect_outstanding = false;
            s.last_disconnect = None;
            ctx.set_state(&mut s, ConnectionState::Connected);
            let save = s.remember.then(|| CredentialsRecord {
                username: ticket.username.clone(),
                password: ticket.password.clone(),
                remember: true,
            });
            let info = SessionInfo {
                session_id: session_id.clone(),
                username: ticket.username.clone(),
                origin: ticket.origin,
            };
            Some((info, save))
        }
    };
    let Some((info, save)) = live else {
        debug!(session = %session_id, "attempt superseded after connect");
        link.disconnect().await;
        return Err(GateError::Superseded);
    };

    tokio::spawn(crate::pumps::session::session_pump(
        ctx.clone(),
        ticket.generation,
        session_id.clone(),
        events,
        ticket.cancel.clone(),
    ));
    tokio::spawn(crate::pumps::session::poll_pump(
        ctx.clone(),
        ticket.generation,
        ticket.cancel.clone(),
    ));

    if let Some(record) = save
        && let Err(e) = record.save(ctx.store.as_ref())
    {
        warn!("failed to persist credentials: {e}");
    }

    match OutboundMessage::json(TOPIC_CLIENTS, &ClientPresence::online(&session_id)) {
        Ok(presence) => {
            if let Err(e) = link.publish(presence).await {
                debug!("failed to announce presence: {e}");
            }
        }
        Err(e) => debug!("failed to encode presence: {e}"),
    }

    // A logout or newer connect may have torn us down during the publish.
    if ctx.lock().generation != ticket.generation {
        debug!(session = %session_id, "attempt superseded while announcing presence");
        return Err(GateError::Superseded);
    }

    info!(session = %session_id, user = %info.username, "connected");
    ctx.status("Connected");
    Ok(info)
}

/// Reacts to the live session's transport closing underneath us.
///
/// The session moves to `Disconnected` unconditionally. Whether a new
/// attempt follows is decided by the reconnect guard alone.
pub(crate) fn handle_transport_closed(ctx: &SessionContext, generation: u64, reason: String) {
    {
        let mut s = ctx.lock();
        if s.generation != generation {
            debug!(%reason, "stale session closed");
            return;
        }
        warn!(%reason, "connection lost");
        // The link is already gone.
        let _ = teardown_locked(&mut s);
        s.last_disconnect = Some(reason.clone());
        ctx.set_state(&mut s, ConnectionState::Disconnected);
        ctx.status(format!("Disconnected: {reason}"));
    }
    request_reconnect(ctx, LifecycleSignal::TransportClosedUnexpectedly);
}

/// Starts an automatic attempt if the guard allows it.
///
/// Returns `true` if an attempt was started.
pub(crate) fn request_reconnect(ctx: &SessionContext, signal: LifecycleSignal) -> bool {
    if ctx.shutdown.is_cancelled() {
        return false;
    }
    let stored = match CredentialsRecord::load(ctx.store.as_ref()) {
        Ok(record) => record,
        Err(e) => {
            warn!(%signal, "cannot read stored credentials: {e}");
            return false;
        }
    };

    let (ticket, old_link) = {
        let mut s = ctx.lock();
        if let Err(reason) = reconnect_decision(s.state, s.reconnect_outstanding, &stored) {
            debug!(%signal, ?reason, state = ?s.state, "reconnect skipped");
            return false;
        }
        let started = begin_attempt(
            ctx,
            &mut s,
            AttemptOrigin::Automatic,
            stored.username,
            stored.password,
        );
        ctx.emit(ConnectionEvent::ReconnectRequested(signal));
        started
    };
    info!(%signal, "reconnecting with remembered credentials");

    tokio::spawn(reconnect_watchdog(
        ctx.clone(),
        ticket.generation,
        ticket.cancel.clone(),
    ));
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if let Some(link) = old_link {
            link.disconnect().await;
        }
        if let Err(e) = establish(&ctx, ticket).await {
            debug!("automatic attempt ended: {e}");
        }
    });
    true
}

/// Clears an automatic attempt that is still outstanding after the
/// watchdog period. No failure is surfaced.
async fn reconnect_watchdog(ctx: SessionContext, generation: u64, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(ctx.config.reconnect.watchdog) => {}
    }

    let stale_link = {
        let mut s = ctx.lock();
        if s.generation != generation || s.state != ConnectionState::Reconnecting {
            return;
        }
        warn!("reconnect attempt stalled, giving up");
        let link = teardown_locked(&mut s);
        s.reconnect_outstanding = false;
        ctx.set_state(&mut s, ConnectionState::Disconnected);
        ctx.status("Disconnected");
        link
    };
    if let Some(link) = stale_link {
        link.disconnect().await;
    }
}
