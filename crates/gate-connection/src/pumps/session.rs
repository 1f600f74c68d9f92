//! Session pumps: inbound demultiplexing and the periodic poll tick.

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use gate_protocol::constants::session_from_response_topic;
use gate_protocol::{CommandResponse, Heartbeat, InboundMessage, TOPIC_STATUS};

use crate::reconnection::{SessionContext, handle_transport_closed};
use crate::transport::LinkEvent;
use crate::types::{CommandOutcome, ConnectionEvent};

/// Reads the session's inbound events until it closes or is cancelled.
///
/// Heartbeats go to the liveness monitor, responses addressed to this
/// session go to the correlation registry. A close not caused by local
/// teardown is reported through [`handle_transport_closed`].
pub(crate) async fn session_pump(
    ctx: SessionContext,
    generation: u64,
    session_id: String,
    mut events: mpsc::Receiver<LinkEvent>,
    cancel: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(session = %session_id, "session pump cancelled");
                return;
            }
            event = events.recv() => match event {
                Some(LinkEvent::Message(msg)) => {
                    handle_message(&ctx, generation, &session_id, &msg);
                }
                Some(LinkEvent::Closed { reason }) => break reason,
                None => break "connection lost".to_string(),
            }
        }
    };

    handle_transport_closed(&ctx, generation, reason);
}

/// Routes one inbound message.
pub(crate) fn handle_message(
    ctx: &SessionContext,
    generation: u64,
    session_id: &str,
    msg: &InboundMessage,
) {
    if msg.topic == TOPIC_STATUS {
        handle_heartbeat(ctx, generation, msg);
        return;
    }
    match session_from_response_topic(&msg.topic) {
        Some(id) if id == session_id => handle_response(ctx, generation, msg),
        Some(id) => debug!(%id, "response for another session ignored"),
        None => trace!(topic = %msg.topic, "unrouted message"),
    }
}

fn handle_heartbeat(ctx: &SessionContext, generation: u64, msg: &InboundMessage) {
    // Presence traffic shares the topic.
    let Ok(heartbeat) = msg.parse_payload::<Heartbeat>() else {
        trace!("non-heartbeat status message");
        return;
    };

    let mut s = ctx.lock();
    if s.generation != generation {
        return;
    }
    let flipped = s.liveness.record_heartbeat(heartbeat.hb, Instant::now());
    let remote_time = s.liveness.remote_time();
    trace!(?remote_time, "heartbeat");
    ctx.emit(ConnectionEvent::Heartbeat { remote_time });
    if let Some(online) = flipped {
        debug!(online, "device liveness changed");
        ctx.emit(ConnectionEvent::LivenessChanged { online });
    }
}

fn handle_response(ctx: &SessionContext, generation: u64, msg: &InboundMessage) {
    let token = match msg.correlation_token() {
        Ok(token) => token,
        Err(e) => {
            warn!("response without usable correlation data: {e}");
            return;
        }
    };
    let response: CommandResponse = match msg.parse_payload() {
        Ok(r) => r,
        Err(e) => {
            warn!(%token, "malformed command response: {e}");
            return;
        }
    };
    let outcome = if response.is_success() {
        CommandOutcome::Success
    } else {
        CommandOutcome::Failure(response.error.unwrap_or_else(|| "unknown error".into()))
    };

    let mut s = ctx.lock();
    if s.generation != generation {
        return;
    }
    let Some(action) = s.registry.resolve(&token, outcome.clone()) else {
        debug!(%token, "response for unknown or settled command");
        return;
    };
    let status = match &outcome {
        CommandOutcome::Success => format!("{action} command successful"),
        CommandOutcome::Failure(e) => format!("{action} command failed: {e}"),
    };
    debug!(%token, %action, ?outcome, "command resolved");
    ctx.emit(ConnectionEvent::CommandResolved {
        token,
        action,
        outcome,
    });
    ctx.status(status);
}

/// Re-evaluates liveness and expires stale commands on a fixed interval.
pub(crate) async fn poll_pump(ctx: SessionContext, generation: u64, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(ctx.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if !poll_once(&ctx, generation, Instant::now()) {
                    return;
                }
            }
        }
    }
}

/// One poll tick. Returns `false` once the session is stale.
pub(crate) fn poll_once(ctx: &SessionContext, generation: u64, now: Instant) -> bool {
    let mut s = ctx.lock();
    if s.generation != generation {
        return false;
    }
    if let Some(online) = s.liveness.evaluate(now) {
        debug!(online, "device liveness changed");
        ctx.emit(ConnectionEvent::LivenessChanged { online });
    }
    for (token, action) in s.registry.expire(now, ctx.config.command_timeout) {
        warn!(%token, %action, "command expired without response");
        ctx.emit(ConnectionEvent::CommandExpired { token, action });
        ctx.status(format!("{action} command timed out"));
    }
    true
}
