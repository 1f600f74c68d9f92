//! Device runner: broker session, command loop and reconnection.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use gate_connection::{Connector, Established, LinkEvent, SessionOptions, TransportError};
use gate_protocol::constants::HEARTBEAT_PERIOD;
use gate_protocol::{QoS, TOPIC_CONTROL};

use crate::actuator::Actuator;
use crate::handler::CommandHandler;
use crate::heartbeat::heartbeat_loop;

/// Device session settings.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    pub heartbeat_period: Duration,
    /// Delay before reconnecting after the session drops.
    pub retry_delay: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            client_id: "gate_device".into(),
            username: String::new(),
            password: String::new(),
            keep_alive: Duration::from_secs(20),
            heartbeat_period: HEARTBEAT_PERIOD,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Errors that stop the device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("broker rejected credentials: {0}")]
    AuthRejected(String),

    #[error("the HTTP API needs a non-empty secret")]
    MissingApiSecret,
}

/// A gate device serving commands over the broker.
pub struct GateDevice {
    connector: Arc<dyn Connector>,
    handler: CommandHandler,
    config: DeviceConfig,
}

impl GateDevice {
    pub fn new(
        config: DeviceConfig,
        connector: Arc<dyn Connector>,
        actuator: Arc<dyn Actuator>,
    ) -> Self {
        Self {
            connector,
            handler: CommandHandler::new(actuator),
            config,
        }
    }

    /// Serves until `cancel` fires, reconnecting whenever the session drops.
    ///
    /// Only a credential rejection ends the loop with an error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), DeviceError> {
        loop {
            match self.run_session(&cancel).await {
                Ok(()) => return Ok(()),
                Err(TransportError::AuthRejected(reason)) => {
                    return Err(DeviceError::AuthRejected(reason));
                }
                Err(e) => warn!(
                    error = %e,
                    retry_in = ?self.config.retry_delay,
                    "device session ended"
                ),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.config.retry_delay) => {}
            }
        }
    }

    /// One broker session. `Ok` means cancelled.
    async fn run_session(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        let options = SessionOptions {
            client_id: self.config.client_id.clone(),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
            keep_alive: self.config.keep_alive,
            will: None,
        };
        let Established { link, mut events } = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            r = self.connector.connect(options) => r?,
        };
        info!(client = %self.config.client_id, "connected to broker");

        if let Err(e) = link.subscribe(TOPIC_CONTROL, QoS::AtLeastOnce).await {
            link.disconnect().await;
            return Err(e);
        }

        let session = cancel.child_token();
        let _stop_heartbeat = session.clone().drop_guard();
        tokio::spawn(heartbeat_loop(
            link.clone(),
            self.config.heartbeat_period,
            session,
        ));

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("device shutting down");
                    link.disconnect().await;
                    return Ok(());
                }
                event = events.recv() => match event {
                    Some(LinkEvent::Message(msg)) if msg.topic == TOPIC_CONTROL => {
                        trace!(bytes = msg.payload.len(), "command received");
                        if let Some(reply) = self.handler.handle(&msg).await
                            && let Err(e) = link.publish(reply).await
                        {
                            warn!("error publishing acknowledgement: {e}");
                        }
                    }
                    Some(LinkEvent::Message(msg)) => trace!(topic = %msg.topic, "ignoring message"),
                    Some(LinkEvent::Closed { reason }) => return Err(TransportError::Network(reason)),
                    None => return Err(TransportError::Network("connection lost".into())),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::MockActuator;
    use gate_connection::{ConnectBehavior, MemoryBroker};

    fn device(broker: &MemoryBroker) -> GateDevice {
        GateDevice::new(
            DeviceConfig {
                username: "device".into(),
                password: "pw".into(),
                ..DeviceConfig::default()
            },
            Arc::new(broker.clone()),
            Arc::new(MockActuator::new(Duration::ZERO)),
        )
    }

    #[tokio::test]
    async fn auth_rejection_stops_device() {
        let broker = MemoryBroker::new().with_account("device", "other");
        let result = device(&broker).run(CancellationToken::new()).await;
        assert!(matches!(result, Err(DeviceError::AuthRejected(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_network_failure() {
        let broker = MemoryBroker::new();
        broker.script(ConnectBehavior::Fail(TransportError::Network("refused".into())));
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let device = device(&broker);
            let cancel = cancel.clone();
            async move { device.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(broker.connect_attempts().len(), 2);
        assert_eq!(broker.connected_clients(), vec!["gate_device".to_string()]);

        assert!(broker.drop_client("gate_device", "keepalive timeout"));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(broker.connect_attempts().len(), 3);

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
        assert!(broker.connected_clients().is_empty());
    }
}
