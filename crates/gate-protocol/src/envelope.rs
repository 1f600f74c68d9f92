use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::constants::QoS;

/// Errors decoding or encoding a payload.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing correlation data")]
    MissingCorrelation,
}

/// A publication leaving this node.
///
/// `response_topic` and `correlation_data` map onto the MQTT v5 publish
/// properties of the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
}

impl OutboundMessage {
    /// Creates an at-least-once, non-retained publication with a JSON payload.
    pub fn json<T: Serialize>(topic: impl Into<String>, payload: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            topic: topic.into(),
            payload: serde_json::to_vec(payload)?,
            qos: QoS::AtLeastOnce,
            retain: false,
            response_topic: None,
            correlation_data: None,
        })
    }

    /// Sets the reply address and correlation token.
    pub fn with_reply(mut self, response_topic: impl Into<String>, token: &str) -> Self {
        self.response_topic = Some(response_topic.into());
        self.correlation_data = Some(token.as_bytes().to_vec());
        self
    }

    /// Creates a reply to `request`, echoing its correlation data.
    ///
    /// Returns `None` when the request carried no response topic.
    pub fn reply_to<T: Serialize>(
        request: &InboundMessage,
        payload: &T,
    ) -> Result<Option<Self>, ProtocolError> {
        let Some(topic) = request.response_topic.as_deref() else {
            return Ok(None);
        };
        let mut msg = Self::json(topic, payload)?;
        msg.correlation_data = request.correlation_data.clone();
        Ok(Some(msg))
    }
}

/// A publication received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
}

impl InboundMessage {
    /// Creates a message without MQTT v5 properties.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            response_topic: None,
            correlation_data: None,
        }
    }

    /// Deserializes the JSON payload.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Correlation data interpreted as a UTF-8 token.
    pub fn correlation_token(&self) -> Result<String, ProtocolError> {
        self.correlation_data
            .as_deref()
            .map(|d| String::from_utf8_lossy(d).into_owned())
            .ok_or(ProtocolError::MissingCorrelation)
    }
}

impl From<OutboundMessage> for InboundMessage {
    fn from(msg: OutboundMessage) -> Self {
        Self {
            topic: msg.topic,
            payload: msg.payload,
            response_topic: msg.response_topic,
            correlation_data: msg.correlation_data,
        }
    }
}
