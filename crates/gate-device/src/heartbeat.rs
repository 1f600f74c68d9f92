//! Periodic heartbeat on `gate/status`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use gate_connection::Link;
use gate_protocol::{Heartbeat, OutboundMessage, ProtocolError, TOPIC_STATUS};

/// Builds the heartbeat publication for `now`.
pub fn heartbeat_message(now: DateTime<Utc>) -> Result<OutboundMessage, ProtocolError> {
    OutboundMessage::json(TOPIC_STATUS, &Heartbeat::at(now))
}

/// Publishes a heartbeat immediately, then every `period` until cancelled.
pub(crate) async fn heartbeat_loop(link: Arc<dyn Link>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let msg = match heartbeat_message(Utc::now()) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("error encoding heartbeat: {e}");
                continue;
            }
        };
        match link.publish(msg).await {
            Ok(()) => debug!("heartbeat published"),
            Err(e) => warn!("error publishing heartbeat: {e}"),
        }
    }
}
