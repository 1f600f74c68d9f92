//! MQTT v5 transport built on `rumqttc`.
//!
//! Each connect attempt creates a fresh client and event loop. The event
//! loop is driven until the broker's CONNACK, then handed to a pump task
//! that forwards publications and reports closure. Automatic reconnection
//! inside `rumqttc` is never used: the manager owns that policy.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS as MqttQoS;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, LastWill, Packet, PublishProperties};
use rumqttc::v5::{AsyncClient, ConnectionError, Event, MqttOptions};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use gate_protocol::{OutboundMessage, QoS};

use crate::config::BrokerConfig;
use crate::transport::{Connector, Established, Link, SessionOptions, TransportError};

/// Capacity of the client request queue and the inbound event channel.
const CHANNEL_CAPACITY: usize = 64;

/// Opens MQTT v5 sessions against a single broker.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    broker: BrokerConfig,
}

impl MqttConnector {
    pub fn new(broker: BrokerConfig) -> Self {
        Self { broker }
    }

    fn options(&self, session: &SessionOptions) -> MqttOptions {
        let mut opts = MqttOptions::new(&session.client_id, &self.broker.host, self.broker.port);
        opts.set_keep_alive(session.keep_alive);
        opts.set_clean_start(true);
        opts.set_credentials(session.username.clone(), session.password.clone());
        if let Some(will) = &session.will {
            opts.set_last_will(LastWill::new(
                will.topic.clone(),
                will.payload.clone(),
                to_mqtt_qos(will.qos),
                will.retain,
                None,
            ));
        }
        if self.broker.tls {
            opts.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        opts
    }
}

#[async_trait]
impl Connector for MqttConnector {
    async fn connect(&self, session: SessionOptions) -> Result<Established, TransportError> {
        info!(
            client = %session.client_id,
            host = %self.broker.host,
            port = self.broker.port,
            tls = self.broker.tls,
            "connecting to broker"
        );
        let (client, mut eventloop) = AsyncClient::new(self.options(&session), CHANNEL_CAPACITY);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => break,
                Ok(event) => debug!(?event, "event before connack"),
                Err(e) => return Err(classify_connection_error(e)),
            }
        }

        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(crate::pumps::event_loop::event_loop_pump(
            eventloop,
            events_tx,
            cancel.clone(),
        ));

        Ok(Established {
            link: Arc::new(MqttLink {
                client_id: session.client_id,
                client,
                cancel,
                pump,
            }),
            events: events_rx,
        })
    }
}

/// A live MQTT session.
pub struct MqttLink {
    client_id: String,
    client: AsyncClient,
    cancel: CancellationToken,
    pump: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl Link for MqttLink {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, to_mqtt_qos(qos))
            .await
            .map_err(|e| TransportError::Network(e.to_string()))
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let properties = PublishProperties {
            response_topic: message.response_topic,
            correlation_data: message.correlation_data.map(Bytes::from),
            ..PublishProperties::default()
        };
        self.client
            .publish_with_properties(
                message.topic,
                to_mqtt_qos(message.qos),
                message.retain,
                message.payload,
                properties,
            )
            .await
            .map_err(|e| TransportError::Network(e.to_string()))
    }

    async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(client = %self.client_id, error = %e, "disconnect request failed");
        }
        // Leave the pump running briefly so the DISCONNECT is flushed.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        self.cancel.cancel();
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.pump.abort();
    }
}

pub(crate) fn to_mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

/// Maps an event loop error onto the transport taxonomy.
pub(crate) fn classify_connection_error(err: ConnectionError) -> TransportError {
    match err {
        ConnectionError::ConnectionRefused(
            code @ (ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized),
        ) => TransportError::AuthRejected(format!("{code:?}")),
        ConnectionError::ConnectionRefused(code) => {
            TransportError::Other(format!("connection refused: {code:?}"))
        }
        ConnectionError::Timeout(_) => TransportError::Timeout,
        ConnectionError::Io(e) => TransportError::Network(e.to_string()),
        ConnectionError::Tls(e) => TransportError::Network(format!("tls: {e}")),
        ConnectionError::MqttState(e) => TransportError::Network(e.to_string()),
        other => TransportError::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::FailureKind;

    fn session(will: Option<OutboundMessage>) -> SessionOptions {
        SessionOptions {
            client_id: "gate_app_0badf00d".into(),
            username: "alice".into(),
            password: "secret".into(),
            keep_alive: Duration::from_secs(30),
            will,
        }
    }

    #[test]
    fn qos_mapping() {
        assert_eq!(to_mqtt_qos(QoS::AtMostOnce), MqttQoS::AtMostOnce);
        assert_eq!(to_mqtt_qos(QoS::AtLeastOnce), MqttQoS::AtLeastOnce);
        assert_eq!(to_mqtt_qos(QoS::ExactlyOnce), MqttQoS::ExactlyOnce);
    }

    #[test]
    fn auth_refusal_is_auth_rejected() {
        let err = classify_connection_error(ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword,
        ));
        assert!(matches!(err, TransportError::AuthRejected(_)));

        let err = classify_connection_error(ConnectionError::ConnectionRefused(
            ConnectReturnCode::NotAuthorized,
        ));
        assert!(matches!(err, TransportError::AuthRejected(_)));
    }

    #[test]
    fn other_refusals_are_not_auth() {
        let err = classify_connection_error(ConnectionError::ConnectionRefused(
            ConnectReturnCode::ServerUnavailable,
        ));
        assert!(matches!(err, TransportError::Other(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_and_io_are_network_class() {
        let elapsed = tokio::time::timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        let err = classify_connection_error(ConnectionError::Timeout(elapsed));
        assert_eq!(err, TransportError::Timeout);
        assert_eq!(err.kind(), FailureKind::Network);

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            classify_connection_error(ConnectionError::Io(io)),
            TransportError::Network(_)
        ));
        let state = rumqttc::v5::StateError::AwaitPingResp;
        assert!(matches!(
            classify_connection_error(ConnectionError::MqttState(state)),
            TransportError::Network(_)
        ));
    }

    #[test]
    fn options_carry_session_parameters() {
        let connector = MqttConnector::new(BrokerConfig {
            host: "broker.local".into(),
            port: 1883,
            tls: false,
        });
        let will = OutboundMessage::json("gate/clients", &serde_json::json!({"status": "offline"}))
            .unwrap();
        let opts = connector.options(&session(Some(will)));

        assert_eq!(opts.client_id(), "gate_app_0badf00d");
        assert_eq!(opts.broker_address(), ("broker.local".to_string(), 1883));
        assert_eq!(opts.keep_alive(), Duration::from_secs(30));
        assert!(opts.last_will().is_some());
    }
}
