use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Topic the client publishes command requests to.
pub const TOPIC_CONTROL: &str = "gate/control";

/// Topic the device publishes heartbeats and presence to.
pub const TOPIC_STATUS: &str = "gate/status";

/// Topic carrying client presence (will messages and graceful notices).
pub const TOPIC_CLIENTS: &str = "gate/clients";

/// Prefix of the per-session response topic.
pub const TOPIC_RESPONSES_PREFIX: &str = "gate/responses/";

/// Prefix of generated client session identifiers.
pub const SESSION_ID_PREFIX: &str = "gate_app_";

/// A device is considered offline when no heartbeat arrived within this window.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(120);

/// How often the device publishes a heartbeat.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// Broker keep-alive interval used by the client.
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Delivery guarantee level of a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QoS {
    #[serde(rename = "at_most_once")]
    AtMostOnce,
    /// Used for every command, response and heartbeat.
    #[default]
    #[serde(rename = "at_least_once")]
    AtLeastOnce,
    #[serde(rename = "exactly_once")]
    ExactlyOnce,
}

/// Returns the response topic bound to a session identifier.
pub fn response_topic(session_id: &str) -> String {
    format!("{TOPIC_RESPONSES_PREFIX}{session_id}")
}

/// Extracts the session identifier from a response topic, if it is one.
pub fn session_from_response_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(TOPIC_RESPONSES_PREFIX)
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_topic_embeds_session() {
        assert_eq!(response_topic("gate_app_1a2b3c4d"), "gate/responses/gate_app_1a2b3c4d");
    }

    #[test]
    fn session_from_response_topic_parses() {
        assert_eq!(
            session_from_response_topic("gate/responses/gate_app_ff"),
            Some("gate_app_ff")
        );
        assert_eq!(session_from_response_topic("gate/responses/"), None);
        assert_eq!(session_from_response_topic("gate/responses/a/b"), None);
        assert_eq!(session_from_response_topic(TOPIC_STATUS), None);
    }

    #[test]
    fn default_qos_is_at_least_once() {
        assert_eq!(QoS::default(), QoS::AtLeastOnce);
    }
}
