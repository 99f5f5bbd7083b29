//! Coordinator: the process-wide handle to the broker
//!
//! [`Coordinator::spawn`] starts the broker I/O task, which is the only
//! place where wire reads and writes happen and the single owner of the
//! subscription registry. The returned [`Coordinator`] is a cheap, cloneable
//! handle whose calls never block: every request is queued as a
//! [`Command`] and applied by the I/O task in order.
//!
//! ```text
//! Coordinator ──[Command]──► I/O task ──[Delivery]──► ConsumerContext
//!   (clone)                  ├─ BrokerConnection (registry, state)
//!                            └─ Session ◄──[Event]── poller (rumqttc EventLoop)
//! ```
//!
//! The event loop is polled by its own task so an in-flight connect is
//! never interrupted by incoming commands.

use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::bridge::{self, ConsumerContext};
use super::config::BrokerSettings;
use super::connection::{BrokerConnection, Command, ConnectionState};
use super::error::BridgeError;
use super::registry::Callback;

/// Capacity of the rumqttc request channel
pub(crate) const REQUEST_CAPACITY: usize = 100;

/// How long a clean shutdown waits for the DISCONNECT to be written
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct Coordinator {
    commands: mpsc::UnboundedSender<Command<BrokerSettings>>,
    state: watch::Receiver<ConnectionState>,
}

impl Coordinator {
    /// Starts the I/O task with an empty registry and no connection.
    pub fn spawn() -> (Self, ConsumerContext, JoinHandle<()>) {
        let (bridge_tx, consumer) = bridge::channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let io_task = IoTask::new(BrokerConnection::new(bridge_tx, state_tx), command_rx);
        let handle = tokio::spawn(io_task.run());
        info!("MQTT coordinator started");

        (Self::from_parts(command_tx, state_rx), consumer, handle)
    }

    pub(crate) fn from_parts(
        commands: mpsc::UnboundedSender<Command<BrokerSettings>>,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self { commands, state }
    }

    /// Starts a session asynchronously. Does not wait for the broker.
    ///
    /// A refused or failed attempt is not retried; call `connect` again.
    pub fn connect(&self, settings: BrokerSettings) {
        info!(
            "Attempting to connect to MQTT broker at {}:{} (protocol: {:?})",
            settings.host, settings.port, settings.protocol
        );
        self.send(Command::Connect(Box::new(settings)));
    }

    /// Registers `callback` for `pattern`. Subscribes on the wire now if
    /// connected, otherwise on the next successful connect.
    pub fn subscribe(&self, pattern: &str, callback: Callback) {
        self.send(Command::Register {
            pattern: pattern.to_string(),
            callback,
        });
    }

    /// Removes one registration of `callback` for `pattern`.
    pub fn unsubscribe(&self, pattern: &str, callback: &Callback) {
        self.send(Command::Unregister {
            pattern: pattern.to_string(),
            callback: callback.clone(),
        });
    }

    /// QoS 0, not retained. Dropped with an error log when not connected.
    pub fn publish(&self, topic: &str, payload: &str) {
        self.send(Command::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver for observers of connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Waits until connected, the timeout elapses or `cancel` fires.
    pub async fn wait_connected(&self, timeout: Duration, cancel: &CancellationToken) -> bool {
        let mut state = self.state.clone();
        tokio::select! {
            _ = cancel.cancelled() => false,
            outcome = tokio::time::timeout(
                timeout,
                state.wait_for(|s| *s == ConnectionState::Connected),
            ) => matches!(outcome, Ok(Ok(_))),
        }
    }

    /// Stops the I/O task and closes the session. Idempotent.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack_tx)).is_err() {
            debug!("MQTT coordinator already stopped");
            return;
        }
        if ack_rx.await.is_err() {
            debug!("MQTT coordinator stopped before acknowledging shutdown");
        }
    }

    fn send(&self, command: Command<BrokerSettings>) {
        if self.commands.send(command).is_err() {
            error!(
                "{}",
                BridgeError::ChannelClosed("MQTT coordinator is shut down".to_string())
            );
        }
    }
}

/// Broker I/O context: owns the client and the registry
struct IoTask {
    connection: BrokerConnection<AsyncClient>,
    session: Option<Session>,
    commands: mpsc::UnboundedReceiver<Command<BrokerSettings>>,
}

/// A running rumqttc event loop, polled by its own task
struct Session {
    events: mpsc::UnboundedReceiver<Result<Event, ConnectionError>>,
    cancel: CancellationToken,
    poller: JoinHandle<()>,
}

impl Session {
    fn spawn(event_loop: EventLoop, reconnect_delay: Duration) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let poller = tokio::spawn(poll_events(event_loop, tx, reconnect_delay, cancel.clone()));
        Self {
            events,
            cancel,
            poller,
        }
    }

    /// Stops the poller. With `flush`, gives it `DISCONNECT_GRACE` to write
    /// the queued DISCONNECT first.
    async fn close(mut self, flush: bool) {
        if flush
            && tokio::time::timeout(DISCONNECT_GRACE, &mut self.poller)
                .await
                .is_ok()
        {
            return;
        }
        self.cancel.cancel();
        let _ = (&mut self.poller).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Polls `event_loop` until cancelled or a DISCONNECT went out.
///
/// A failed poll is retried after `reconnect_delay`; rumqttc reconnects on
/// the next poll. The I/O task cancels the poller when a failure is terminal.
async fn poll_events(
    mut event_loop: EventLoop,
    events: mpsc::UnboundedSender<Result<Event, ConnectionError>>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = event_loop.poll() => event,
        };
        let failed = event.is_err();
        let disconnected = matches!(event, Ok(Event::Outgoing(Outgoing::Disconnect)));
        if events.send(event).is_err() || disconnected {
            break;
        }
        if failed {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(reconnect_delay) => {}
            }
        }
    }
    debug!("MQTT event loop stopped");
}

impl IoTask {
    fn new(
        connection: BrokerConnection<AsyncClient>,
        commands: mpsc::UnboundedReceiver<Command<BrokerSettings>>,
    ) -> Self {
        Self {
            connection,
            session: None,
            commands,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect(settings)) => self.start_session(*settings),
                    Some(Command::Shutdown(ack)) => {
                        self.stop().await;
                        let _ = ack.send(());
                        break;
                    }
                    Some(other) => {
                        self.connection.handle_command(other);
                    }
                    None => {
                        debug!("All coordinator handles dropped");
                        self.stop().await;
                        break;
                    }
                },
                event = next_event(&mut self.session) => match event {
                    Some(event) => self.on_event(event),
                    None => {
                        debug!("MQTT event loop ended");
                        self.session = None;
                    }
                },
            }
        }
        info!("MQTT I/O task stopped");
    }

    fn start_session(&mut self, settings: BrokerSettings) {
        let options = match settings.mqtt_options() {
            Ok(options) => options,
            Err(e) => {
                error!("Failed to create MQTT client: {}", e);
                return;
            }
        };

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        self.connection.attach(client);
        self.session = Some(Session::spawn(event_loop, settings.reconnect_delay()));
        info!("MQTT client loop started, waiting for connection...");
    }

    fn on_event(&mut self, event: Result<Event, ConnectionError>) {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    info!("Connected to MQTT broker");
                    self.connection.on_connected();
                } else {
                    self.connection.on_connect_refused(ack.code);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                self.connection.on_message(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!("Subscription acknowledged: {:?}", ack.return_codes);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                self.connection.on_connection_lost("broker sent DISCONNECT");
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                self.connection.on_connect_refused(code);
            }
            Err(e) => {
                if self.connection.on_connection_lost(&e.to_string()) {
                    debug!("MQTT event loop will retry the connection");
                }
            }
        }

        if !self.connection.has_link() {
            // dropping the session cancels its poller
            self.session = None;
        }
    }

    /// Queues a DISCONNECT, lets an established session flush it, then
    /// stops the poller.
    async fn stop(&mut self) {
        let flush = self.connection.is_connected();
        self.connection.shutdown();
        if let Some(session) = self.session.take() {
            session.close(flush).await;
        }
    }
}

/// Next event of the running session; never resolves without one.
async fn next_event(session: &mut Option<Session>) -> Option<Result<Event, ConnectionError>> {
    match session.as_mut() {
        Some(session) => session.events.recv().await,
        None => std::future::pending().await,
    }
}
