//! Command handling: request in, actuation, acknowledgement out.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use gate_protocol::{CommandResponse, GateAction, InboundMessage, OutboundMessage};

use crate::actuator::Actuator;

/// Wire shape before the action is validated.
#[derive(Debug, Deserialize)]
struct RawCommand {
    action: String,
}

/// Executes gate commands and builds their acknowledgements.
pub struct CommandHandler {
    actuator: Arc<dyn Actuator>,
}

impl CommandHandler {
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self { actuator }
    }

    /// Handles one request from `gate/control`.
    ///
    /// Malformed payloads and unknown actions are dropped without a reply.
    /// Returns the acknowledgement to publish, if the request asked for one.
    pub async fn handle(&self, msg: &InboundMessage) -> Option<OutboundMessage> {
        let raw: RawCommand = match msg.parse_payload() {
            Ok(raw) => raw,
            Err(e) => {
                warn!("error decoding command: {e}");
                return None;
            }
        };
        let action: GateAction = match raw.action.parse() {
            Ok(action) => action,
            Err(e) => {
                warn!("{e}");
                return None;
            }
        };

        info!(%action, "executing command");
        let response = match self.actuator.press(action).await {
            Ok(()) => CommandResponse::success(),
            Err(e) => {
                warn!(%action, "actuator error: {e}");
                CommandResponse::failure(e.to_string())
            }
        }
        .with_action(action);

        match OutboundMessage::reply_to(msg, &response) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("error encoding acknowledgement: {e}");
                None
            }
        }
    }
}
