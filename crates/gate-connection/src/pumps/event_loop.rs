//! MQTT event loop pump: forwards publications to the link's event channel.

use rumqttc::v5::mqttbytes::v5::{Packet, Publish};
use rumqttc::v5::{Event, EventLoop};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use gate_protocol::InboundMessage;

use crate::transport::LinkEvent;

/// Drives the event loop until the session ends or `cancel` fires.
///
/// A broker DISCONNECT or a connection error is reported once as
/// [`LinkEvent::Closed`]. Cancellation is a local teardown and reports
/// nothing; the receiver simply observes the channel closing.
pub(crate) async fn event_loop_pump(
    mut eventloop: EventLoop,
    events_tx: mpsc::Sender<LinkEvent>,
    cancel: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("event loop cancelled");
                return;
            }

            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let msg = to_inbound(publish);
                    trace!(topic = %msg.topic, bytes = msg.payload.len(), "publish received");
                    if events_tx.send(LinkEvent::Message(msg)).await.is_err() {
                        debug!("link receiver dropped, stopping event loop");
                        return;
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect(d))) => {
                    break format!("broker disconnected: {:?}", d.reason_code);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT event loop error: {e}");
                    break e.to_string();
                }
            }
        }
    };

    let _ = events_tx.send(LinkEvent::Closed { reason }).await;
}

/// Converts a received PUBLISH into the transport-neutral message.
pub(crate) fn to_inbound(publish: Publish) -> InboundMessage {
    let topic = String::from_utf8_lossy(&publish.topic).into_owned();
    let mut msg = InboundMessage::new(topic, publish.payload.to_vec());
    if let Some(props) = publish.properties {
        msg.response_topic = props.response_topic;
        msg.correlation_data = props.correlation_data.map(|b| b.to_vec());
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::QoS;
    use rumqttc::v5::mqttbytes::v5::PublishProperties;

    #[test]
    fn plain_publish_converts() {
        let publish = Publish::new("gate/status", QoS::AtMostOnce, br#"{"hb":1}"#.to_vec(), None);
        let msg = to_inbound(publish);
        assert_eq!(msg.topic, "gate/status");
        assert_eq!(msg.payload, br#"{"hb":1}"#);
        assert!(msg.response_topic.is_none());
        assert!(msg.correlation_data.is_none());
    }

    #[test]
    fn reply_properties_are_kept() {
        let props = PublishProperties {
            response_topic: Some("gate/responses/gate_app_00c0ffee".into()),
            correlation_data: Some(Bytes::from_static(b"7-abc")),
            ..PublishProperties::default()
        };
        let publish = Publish::new(
            "gate/control",
            QoS::AtLeastOnce,
            br#"{"action":"full"}"#.to_vec(),
            Some(props),
        );
        let msg = to_inbound(publish);
        assert_eq!(
            msg.response_topic.as_deref(),
            Some("gate/responses/gate_app_00c0ffee")
        );
        assert_eq!(msg.correlation_token().unwrap(), "7-abc");
    }
}
