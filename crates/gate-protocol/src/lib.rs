pub mod constants;
pub mod envelope;
pub mod messages;
pub mod signing;
pub mod types;

// Re-export primary types for convenience.
pub use constants::{QoS, TOPIC_CLIENTS, TOPIC_CONTROL, TOPIC_STATUS, response_topic};
pub use envelope::{InboundMessage, OutboundMessage, ProtocolError};
pub use messages::{
    ClientPresence, CommandRequest, CommandResponse, Heartbeat, HeartbeatStamp, PresenceStatus,
    ResponseStatus,
};
pub use types::{GateAction, ViewingSide};
