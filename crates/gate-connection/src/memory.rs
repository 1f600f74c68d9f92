//! In-process broker implementing [`Connector`].
//!
//! Routes publications between links by topic filter, checks accounts,
//! delivers will messages on ungraceful drops, and can be scripted to fail
//! or stall connect attempts. Used by tests and local demos.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use gate_protocol::{OutboundMessage, QoS};

use crate::transport::{Connector, Established, Link, LinkEvent, SessionOptions, TransportError};

/// Per-link inbound buffer.
const LINK_BUFFER: usize = 64;

/// Scripted behaviour for the next connect attempt.
#[derive(Debug, Clone)]
pub enum ConnectBehavior {
    Accept,
    Fail(TransportError),
    /// Accept after a delay.
    Delay(Duration),
    /// Never complete.
    Hang,
}

struct ClientEntry {
    tx: mpsc::Sender<LinkEvent>,
    filters: Vec<String>,
    will: Option<OutboundMessage>,
}

#[derive(Default)]
struct BrokerState {
    accounts: HashMap<String, String>,
    clients: HashMap<String, ClientEntry>,
    script: VecDeque<ConnectBehavior>,
    attempts: Vec<String>,
    published: Vec<OutboundMessage>,
}

impl BrokerState {
    fn route(&mut self, message: OutboundMessage) {
        for (id, client) in &self.clients {
            if client.filters.iter().any(|f| topic_matches(f, &message.topic)) {
                trace!(client = %id, topic = %message.topic, "routing publication");
                if client
                    .tx
                    .try_send(LinkEvent::Message(message.clone().into()))
                    .is_err()
                {
                    debug!(client = %id, "link buffer full, dropping publication");
                }
            }
        }
        self.published.push(message);
    }
}

/// Shared in-memory broker. Cloning yields another handle to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Creates a broker accepting any credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts logins to the registered accounts.
    pub fn with_account(self, username: &str, password: &str) -> Self {
        self.lock()
            .accounts
            .insert(username.to_string(), password.to_string());
        self
    }

    /// Queues a behaviour for the next connect attempt.
    pub fn script(&self, behavior: ConnectBehavior) {
        self.lock().script.push_back(behavior);
    }

    /// Client identifiers of every connect attempt, in order.
    pub fn connect_attempts(&self) -> Vec<String> {
        self.lock().attempts.clone()
    }

    /// Identifiers of currently connected clients.
    pub fn connected_clients(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Every publication seen on `topic`.
    pub fn published_on(&self, topic: &str) -> Vec<OutboundMessage> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Publishes a message as if sent by another client.
    pub fn inject(&self, message: OutboundMessage) {
        self.lock().route(message);
    }

    /// Drops a client uncleanly: it sees `Closed` and its will is delivered.
    pub fn drop_client(&self, client_id: &str, reason: &str) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.clients.remove(client_id) else {
            return false;
        };
        let _ = entry.tx.try_send(LinkEvent::Closed {
            reason: reason.to_string(),
        });
        if let Some(will) = entry.will {
            debug!(client = %client_id, "delivering will message");
            state.route(will);
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, options: SessionOptions) -> Result<Established, TransportError> {
        let behavior = {
            let mut state = self.lock();
            state.attempts.push(options.client_id.clone());
            state.script.pop_front().unwrap_or(ConnectBehavior::Accept)
        };

        match behavior {
            ConnectBehavior::Accept => {}
            ConnectBehavior::Fail(err) => return Err(err),
            ConnectBehavior::Delay(delay) => tokio::time::sleep(delay).await,
            ConnectBehavior::Hang => std::future::pending::<()>().await,
        }

        let (tx, rx) = mpsc::channel(LINK_BUFFER);
        let mut state = self.lock();
        if !state.accounts.is_empty()
            && state.accounts.get(&options.username) != Some(&options.password)
        {
            return Err(TransportError::AuthRejected(
                "bad user name or password".into(),
            ));
        }
        if let Some(previous) = state.clients.remove(&options.client_id) {
            let _ = previous.tx.try_send(LinkEvent::Closed {
                reason: "session taken over".into(),
            });
        }
        state.clients.insert(
            options.client_id.clone(),
            ClientEntry {
                tx,
                filters: Vec::new(),
                will: options.will,
            },
        );
        debug!(client = %options.client_id, "client connected");

        Ok(Established {
            link: Arc::new(MemoryLink {
                broker: self.clone(),
                client_id: options.client_id,
            }),
            events: rx,
        })
    }
}

/// A link into a [`MemoryBroker`].
pub struct MemoryLink {
    broker: MemoryBroker,
    client_id: String,
}

#[async_trait]
impl Link for MemoryLink {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        let entry = state
            .clients
            .get_mut(&self.client_id)
            .ok_or(TransportError::NotConnected)?;
        entry.filters.push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        if !state.clients.contains_key(&self.client_id) {
            return Err(TransportError::NotConnected);
        }
        state.route(message);
        Ok(())
    }

    async fn disconnect(&self) {
        if self.broker.lock().clients.remove(&self.client_id).is_some() {
            debug!(client = %self.client_id, "client disconnected");
        }
    }
}

/// MQTT topic filter matching with `+` and trailing `#` wildcards.
pub(crate) fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(id: &str, user: &str, pass: &str) -> SessionOptions {
        SessionOptions {
            client_id: id.into(),
            username: user.into(),
            password: pass.into(),
            keep_alive: Duration::from_secs(30),
            will: None,
        }
    }

    #[test]
    fn topic_filters() {
        assert!(topic_matches("gate/control", "gate/control"));
        assert!(!topic_matches("gate/control", "gate/status"));
        assert!(topic_matches("gate/#", "gate/responses/abc"));
        assert!(topic_matches("gate/responses/+", "gate/responses/abc"));
        assert!(!topic_matches("gate/responses/+", "gate/responses/abc/def"));
        assert!(!topic_matches("gate/responses", "gate/responses/abc"));
    }

    #[tokio::test]
    async fn routes_to_subscribers() {
        let broker = MemoryBroker::new();
        let a = broker.connect(options("a", "u", "p")).await.unwrap();
        let mut b = broker.connect(options("b", "u", "p")).await.unwrap();
        b.link.subscribe("gate/control", QoS::AtLeastOnce).await.unwrap();

        let msg = OutboundMessage::json("gate/control", &serde_json::json!({"action": "full"}))
            .unwrap();
        a.link.publish(msg).await.unwrap();

        match b.events.recv().await.unwrap() {
            LinkEvent::Message(m) => assert_eq!(m.topic, "gate/control"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(broker.published_on("gate/control").len(), 1);
    }

    #[tokio::test]
    async fn rejects_unknown_account() {
        let broker = MemoryBroker::new().with_account("alice", "secret");
        let res = broker.connect(options("c1", "alice", "wrong")).await;
        assert!(matches!(res, Err(TransportError::AuthRejected(_))));
        assert!(broker.connect(options("c2", "alice", "secret")).await.is_ok());
        assert_eq!(broker.connect_attempts(), vec!["c1", "c2"]);
        assert_eq!(broker.connected_clients(), vec!["c2"]);
    }

    #[tokio::test]
    async fn scripted_failure_consumed_once() {
        let broker = MemoryBroker::new();
        broker.script(ConnectBehavior::Fail(TransportError::Timeout));
        assert!(broker.connect(options("x", "u", "p")).await.is_err());
        assert!(broker.connect(options("y", "u", "p")).await.is_ok());
    }

    #[tokio::test]
    async fn drop_client_delivers_will() {
        let broker = MemoryBroker::new();
        let mut watcher = broker.connect(options("w", "u", "p")).await.unwrap();
        watcher
            .link
            .subscribe("gate/clients", QoS::AtLeastOnce)
            .await
            .unwrap();

        let mut opts = options("victim", "u", "p");
        opts.will = Some(
            OutboundMessage::json("gate/clients", &serde_json::json!({"status": "offline"}))
                .unwrap(),
        );
        let mut victim = broker.connect(opts).await.unwrap();

        assert!(broker.drop_client("victim", "network down"));
        assert!(matches!(
            victim.events.recv().await,
            Some(LinkEvent::Closed { .. })
        ));
        assert!(matches!(
            watcher.events.recv().await,
            Some(LinkEvent::Message(_))
        ));
    }

    #[tokio::test]
    async fn graceful_disconnect_skips_will_and_closes_stream() {
        let broker = MemoryBroker::new();
        let mut opts = options("g", "u", "p");
        opts.will = Some(
            OutboundMessage::json("gate/clients", &serde_json::json!({"status": "offline"}))
                .unwrap(),
        );
        let mut session = broker.connect(opts).await.unwrap();
        session.link.disconnect().await;

        assert!(session.events.recv().await.is_none());
        assert!(broker.published_on("gate/clients").is_empty());
        assert!(matches!(
            session
                .link
                .publish(OutboundMessage::json("t", &serde_json::json!({})).unwrap())
                .await,
            Err(TransportError::NotConnected)
        ));
    }
}
