//! Broker connection state machine
//!
//! [`BrokerConnection`] owns the [`SubscriptionRegistry`] and the connection
//! state, and drives a [`BrokerLink`] for wire operations. It is a plain
//! synchronous state machine: the I/O task in
//! [`coordinator`](super::coordinator) feeds it rumqttc events and consumer
//! commands, tests feed it directly through a recording link.
//!
//! ```text
//!               attach(link)            on_connected()
//! Disconnected ─────────────► Connecting ─────────────► Connected
//!      ▲                          │                         │
//!      └──── refused / failed ────┘                         │
//!      └──────────────── connection lost / shutdown ────────┘
//! ```

use rumqttc::{AsyncClient, ConnectReturnCode, QoS, SubscribeFilter};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::bridge::BridgeSender;
use super::dispatcher::{decode_payload, Delivery};
use super::error::BridgeError;
use super::registry::{Callback, SubscriptionRegistry, Unregistered};

/// Filters per SUBSCRIBE frame when replaying the registry. Keeps the replay
/// of a large panel to a handful of queued requests.
pub const REPLAY_BATCH: usize = 50;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Wire operations needed by the connection.
///
/// None of these may block: they queue a frame or fail immediately.
pub trait BrokerLink: Send {
    fn subscribe(&self, pattern: &str) -> Result<(), BridgeError>;

    /// Subscribes several patterns with one request. Every pattern is
    /// attempted; the last failure is returned.
    fn subscribe_many(&self, patterns: &[&str]) -> Result<(), BridgeError> {
        let mut outcome = Ok(());
        for pattern in patterns {
            if let Err(e) = self.subscribe(pattern) {
                error!("{}", e);
                outcome = Err(e);
            }
        }
        outcome
    }

    fn unsubscribe(&self, pattern: &str) -> Result<(), BridgeError>;
    fn publish(&self, topic: &str, payload: &str) -> Result<(), BridgeError>;
    fn disconnect(&self) -> Result<(), BridgeError>;
}

impl BrokerLink for AsyncClient {
    fn subscribe(&self, pattern: &str) -> Result<(), BridgeError> {
        self.try_subscribe(pattern, QoS::AtMostOnce)
            .map_err(|e| BridgeError::Subscribe {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    fn subscribe_many(&self, patterns: &[&str]) -> Result<(), BridgeError> {
        let filters = patterns
            .iter()
            .map(|pattern| SubscribeFilter::new(pattern.to_string(), QoS::AtMostOnce))
            .collect::<Vec<_>>();
        self.try_subscribe_many(filters)
            .map_err(|e| BridgeError::Subscribe {
                pattern: patterns.join(", "),
                reason: e.to_string(),
            })
    }

    fn unsubscribe(&self, pattern: &str) -> Result<(), BridgeError> {
        self.try_unsubscribe(pattern)
            .map_err(|e| BridgeError::Subscribe {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), BridgeError> {
        self.try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| BridgeError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn disconnect(&self) -> Result<(), BridgeError> {
        self.try_disconnect()
            .map_err(|e| BridgeError::ChannelClosed(e.to_string()))
    }
}

/// Requests sent from the consumer side into the I/O task
pub enum Command<S> {
    Register { pattern: String, callback: Callback },
    Unregister { pattern: String, callback: Callback },
    Publish { topic: String, payload: String },
    Connect(Box<S>),
    Shutdown(tokio::sync::oneshot::Sender<()>),
}

pub struct BrokerConnection<L: BrokerLink> {
    registry: SubscriptionRegistry,
    link: Option<L>,
    state: watch::Sender<ConnectionState>,
    bridge: BridgeSender,
    /// Set once the current link reached `Connected` at least once
    established: bool,
}

impl<L: BrokerLink> BrokerConnection<L> {
    pub fn new(bridge: BridgeSender, state: watch::Sender<ConnectionState>) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            link: None,
            state,
            bridge,
            established: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    pub fn link(&self) -> Option<&L> {
        self.link.as_ref()
    }

    /// Installs a fresh client for a new connection attempt.
    ///
    /// A previous link is disconnected first.
    pub fn attach(&mut self, link: L) {
        if let Some(old) = self.link.take() {
            if let Err(e) = old.disconnect() {
                debug!("Previous client already closed: {}", e);
            }
        }
        self.link = Some(link);
        self.established = false;
        self.set_state(ConnectionState::Connecting);
    }

    /// Broker accepted the session: replay every registered pattern.
    pub fn on_connected(&mut self) {
        self.established = true;
        self.set_state(ConnectionState::Connected);

        let Some(link) = self.link.as_ref() else {
            warn!("Connected without a client, nothing to replay");
            return;
        };

        if self.registry.is_empty() {
            info!("No topics to subscribe to on connect");
            return;
        }

        info!(
            "Subscribing to {} topic(s) on connect",
            self.registry.len()
        );
        let patterns: Vec<&str> = self.registry.patterns().collect();
        for batch in patterns.chunks(REPLAY_BATCH) {
            match link.subscribe_many(batch) {
                Ok(()) => info!("Subscribed to {} topic(s) (QoS 0)", batch.len()),
                Err(e) => error!("Replay incomplete: {}", e),
            }
        }
    }

    /// Broker answered the CONNECT with a refusal. Terminal for the attempt.
    pub fn on_connect_refused(&mut self, code: ConnectReturnCode) {
        let failure = match code {
            ConnectReturnCode::NotAuthorized | ConnectReturnCode::BadUserNamePassword => {
                BridgeError::Auth(format!("{:?}, check username/password", code))
            }
            other => BridgeError::Connect(format!("broker refused connection: {:?}", other)),
        };
        error!("{}", failure);
        self.release_link();
    }

    /// Transport error or broker DISCONNECT.
    ///
    /// Returns true when the session had been established, in which case the
    /// link is kept for a later reconnect. A failure before the first
    /// CONNACK is a terminal connect failure and releases the link.
    pub fn on_connection_lost(&mut self, reason: &str) -> bool {
        if self.established {
            warn!("Disconnected from MQTT broker: {}", reason);
            self.set_state(ConnectionState::Disconnected);
            true
        } else {
            error!("{}", BridgeError::Connect(reason.to_string()));
            self.release_link();
            false
        }
    }

    /// Resolves an inbound message and hands it to the consumer context.
    pub fn on_message(&self, topic: &str, raw: &[u8]) {
        let payload = decode_payload(topic, raw);

        let Some(resolved) = self.registry.resolve(topic) else {
            debug!(
                "Received message on unsubscribed topic {} (subscribed: {:?})",
                topic,
                self.registry.patterns().collect::<Vec<_>>()
            );
            return;
        };

        if resolved.pattern == topic {
            debug!("Received message on subscribed topic {}: {}", topic, payload);
        } else {
            debug!(
                "Received message on wildcard topic {} (matched {}): {}",
                resolved.pattern, topic, payload
            );
        }

        self.bridge
            .send(Delivery::new(topic.to_string(), payload, resolved));
    }

    pub fn register(&mut self, pattern: &str, callback: Callback) {
        let created = self.registry.register(pattern, callback);
        let count = self.registry.get(pattern).map_or(0, |s| s.callback_count());
        info!(
            "Registered subscription callback for {} (total callbacks: {})",
            pattern, count
        );

        if !created {
            return;
        }
        match self.link.as_ref() {
            Some(link) if self.is_connected() => match link.subscribe(pattern) {
                Ok(()) => info!("Subscribed to {} (QoS 0)", pattern),
                Err(e) => error!("{}", e),
            },
            Some(_) => info!(
                "Subscription queued for {} (will subscribe when MQTT connects)",
                pattern
            ),
            None => info!(
                "Subscription queued for {} (MQTT client not yet created)",
                pattern
            ),
        }
    }

    pub fn unregister(&mut self, pattern: &str, callback: &Callback) {
        match self.registry.unregister(pattern, callback) {
            Unregistered::PatternRemoved => {
                if let Some(link) = self.link.as_ref().filter(|_| self.is_connected()) {
                    match link.unsubscribe(pattern) {
                        Ok(()) => debug!("Unsubscribed from {}", pattern),
                        Err(e) => error!("{}", e),
                    }
                }
            }
            Unregistered::CallbackRemoved => {
                debug!("Removed one callback for {}", pattern)
            }
            Unregistered::NotFound => {
                debug!("No callback registered for {}, nothing to remove", pattern)
            }
        }
    }

    /// Fire-and-forget QoS 0 publish. Dropped when not connected.
    pub fn publish(&self, topic: &str, payload: &str) -> Result<(), BridgeError> {
        let link = self.link.as_ref().ok_or(BridgeError::ClientMissing)?;
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        link.publish(topic, payload)?;
        info!("Published to {}: {}", topic, payload);
        Ok(())
    }

    /// Applies a registry or publish command. Connect and shutdown are
    /// handled by the owner of the link.
    pub fn handle_command<S>(&mut self, command: Command<S>) -> Option<Command<S>> {
        match command {
            Command::Register { pattern, callback } => self.register(&pattern, callback),
            Command::Unregister { pattern, callback } => self.unregister(&pattern, &callback),
            Command::Publish { topic, payload } => {
                if let Err(e) = self.publish(&topic, &payload) {
                    error!("Cannot publish to {}: {}", topic, e);
                }
            }
            other => return Some(other),
        }
        None
    }

    /// Closes the session and releases the client. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(link) = self.link.take() {
            if let Err(e) = link.disconnect() {
                debug!("Client already closed during shutdown: {}", e);
            }
            info!("MQTT client released");
        }
        self.established = false;
        self.set_state(ConnectionState::Disconnected);
    }

    fn release_link(&mut self) {
        self.link = None;
        self.established = false;
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Connection state {:?} -> {:?}", previous, next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::bridge::{self, ConsumerContext};
    use crate::mqtt::registry::callback;
    use crate::mqtt::test_support::{LinkCall, RecordingLink};
    use std::sync::{Arc, Mutex};

    fn connection() -> (BrokerConnection<RecordingLink>, ConsumerContext) {
        let (tx, consumer) = bridge::channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        (BrokerConnection::new(tx, state), consumer)
    }

    fn recorder(seen: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Callback {
        let seen = seen.clone();
        callback(move |t: &str, p: &str| {
            seen.lock().unwrap().push(format!("{tag}:{t}={p}"));
            Ok(())
        })
    }

    #[test]
    fn replays_registry_in_order_on_connect() {
        let (mut conn, _consumer) = connection();
        let seen = Arc::new(Mutex::new(Vec::new()));
        conn.register("A", recorder(&seen, "a"));
        conn.register("B/+", recorder(&seen, "b"));

        let link = RecordingLink::default();
        conn.attach(link.clone());
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(link.calls().is_empty());

        conn.on_connected();
        assert_eq!(
            link.calls(),
            vec![
                LinkCall::Subscribe("A".into()),
                LinkCall::Subscribe("B/+".into())
            ]
        );
    }

    #[test]
    fn replay_continues_after_failed_subscribe() {
        let (mut conn, _consumer) = connection();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for pattern in ["one", "two", "three"] {
            conn.register(pattern, recorder(&seen, "x"));
        }
        let link = RecordingLink::failing_on("two");
        conn.attach(link.clone());
        conn.on_connected();

        assert_eq!(link.calls().len(), 3);
        assert!(conn.is_connected());
    }

    #[test]
    fn reconnect_replays_again_without_duplicates() {
        let (mut conn, _consumer) = connection();
        let seen = Arc::new(Mutex::new(Vec::new()));
        conn.register("A", recorder(&seen, "a"));
        let link = RecordingLink::default();
        conn.attach(link.clone());
        conn.on_connected();

        assert!(conn.on_connection_lost("network unreachable"));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.has_link());
        assert!(conn.registry().contains("A"));

        conn.on_connected();
        assert_eq!(
            link.calls(),
            vec![LinkCall::Subscribe("A".into()), LinkCall::Subscribe("A".into())]
        );
    }

    #[test]
    fn subscribe_hits_wire_only_when_connected() {
        let (mut conn, _consumer) = connection();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let link = RecordingLink::default();
        conn.attach(link.clone());

        conn.register("early", recorder(&seen, "e"));
        assert!(link.calls().is_empty());

        conn.on_connected();
        conn.register("late", recorder(&seen, "l"));
        conn.register("late", recorder(&seen, "l2"));
        assert_eq!(
            link.calls(),
            vec![
                LinkCall::Subscribe("early".into()),
                LinkCall::Subscribe("late".into())
            ]
        );
    }

    #[test]
    fn last_unregister_unsubscribes_and_stops_delivery() {
        let (mut conn, mut consumer) = connection();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cb = recorder(&seen, "p");
        let link = RecordingLink::default();
        conn.attach(link.clone());
        conn.on_connected();
        conn.register("p/1", cb.clone());

        conn.unregister("p/1", &cb);
        assert_eq!(link.calls().last(), Some(&LinkCall::Unsubscribe("p/1".into())));

        conn.on_message("p/1", b"ON");
        assert_eq!(consumer.drain(), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unregister_while_disconnected_stays_off_the_wire() {
        let (mut conn, _consumer) = connection();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cb = recorder(&seen, "p");
        let link = RecordingLink::default();
        conn.register("p/1", cb.clone());
        conn.attach(link.clone());

        conn.unregister("p/1", &cb);
        assert!(link.calls().is_empty());
        assert!(conn.registry().is_empty());
    }

    #[test]
    fn publish_requires_client_and_connection() {
        let (mut conn, _consumer) = connection();
        assert!(matches!(
            conn.publish("t", "p"),
            Err(BridgeError::ClientMissing)
        ));

        let link = RecordingLink::default();
        conn.attach(link.clone());
        assert!(matches!(
            conn.publish("t", "p"),
            Err(BridgeError::NotConnected)
        ));

        conn.on_connected();
        conn.publish("t", "p").expect("publish while connected");
        assert_eq!(link.calls(), vec![LinkCall::Publish("t".into(), "p".into())]);
    }

    #[test]
    fn refused_connect_is_terminal() {
        let (mut conn, _consumer) = connection();
        conn.attach(RecordingLink::default());
        conn.on_connect_refused(ConnectReturnCode::NotAuthorized);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.has_link());
    }

    #[test]
    fn failure_before_first_connack_is_terminal() {
        let (mut conn, _consumer) = connection();
        conn.attach(RecordingLink::default());
        assert!(!conn.on_connection_lost("connection refused"));
        assert!(!conn.has_link());
    }

    #[test]
    fn exact_subscription_shadows_wildcard() {
        let (mut conn, mut consumer) = connection();
        let seen = Arc::new(Mutex::new(Vec::new()));
        conn.register("a/+/c", recorder(&seen, "wild"));
        conn.register("a/5/c", recorder(&seen, "exact"));

        conn.on_message("a/5/c", b"x");
        conn.on_message("a/6/c", b"y");
        conn.on_message("b/6/c", b"z");
        assert_eq!(consumer.drain(), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["exact:a/5/c=x", "wild:a/6/c=y"]);
    }

    #[tokio::test]
    async fn replay_of_a_large_registry_leaves_request_queue_room() {
        use crate::mqtt::coordinator::REQUEST_CAPACITY;
        use rumqttc::MqttOptions;

        let (tx, _consumer) = bridge::channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let mut conn: BrokerConnection<AsyncClient> = BrokerConnection::new(tx, state);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cb = recorder(&seen, "zone");
        for zone in 0..(REQUEST_CAPACITY as u32 + 50) {
            conn.register(&format!("selfmon/vmod.1/prio/inputs/read/{zone}"), cb.clone());
        }

        let (client, _event_loop) =
            AsyncClient::new(MqttOptions::new("replay", "127.0.0.1", 1883), REQUEST_CAPACITY);
        conn.attach(client.clone());
        conn.on_connected();

        assert_eq!(conn.registry().len(), REQUEST_CAPACITY + 50);
        assert!(BrokerLink::subscribe(&client, "selfmon/vmod.1/vkp/display/1").is_ok());
    }

    #[test]
    fn replay_is_sent_in_batches() {
        struct BatchLink(Arc<Mutex<Vec<usize>>>);

        impl BrokerLink for BatchLink {
            fn subscribe(&self, _pattern: &str) -> Result<(), BridgeError> {
                self.0.lock().unwrap().push(1);
                Ok(())
            }
            fn subscribe_many(&self, patterns: &[&str]) -> Result<(), BridgeError> {
                self.0.lock().unwrap().push(patterns.len());
                Ok(())
            }
            fn unsubscribe(&self, _pattern: &str) -> Result<(), BridgeError> {
                Ok(())
            }
            fn publish(&self, _topic: &str, _payload: &str) -> Result<(), BridgeError> {
                Ok(())
            }
            fn disconnect(&self) -> Result<(), BridgeError> {
                Ok(())
            }
        }

        let (tx, _consumer) = bridge::channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let mut conn = BrokerConnection::new(tx, state);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for n in 0..(REPLAY_BATCH * 2 + 7) {
            conn.register(&format!("g/{n}"), recorder(&seen, "g"));
        }
        let batches = Arc::new(Mutex::new(Vec::new()));
        conn.attach(BatchLink(batches.clone()));
        conn.on_connected();

        assert_eq!(*batches.lock().unwrap(), vec![REPLAY_BATCH, REPLAY_BATCH, 7]);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (mut conn, _consumer) = connection();
        let link = RecordingLink::default();
        conn.attach(link.clone());
        conn.on_connected();
        conn.shutdown();
        conn.shutdown();
        assert_eq!(link.calls(), vec![LinkCall::Disconnect]);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
