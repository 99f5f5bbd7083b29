//! # MQTT Integration Module
//!
//! Owns the single broker connection of the bridge and routes every inbound
//! message to the callbacks registered for it.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs       - Broker settings and rumqttc options
//! ├── tls.rs          - Transport selection (TCP, TLS, insecure TLS)
//! ├── topic.rs        - `+` / `#` wildcard matching
//! ├── registry.rs     - Pattern -> callbacks, exact then first wildcard
//! ├── connection.rs   - Connection state machine, replay on connect
//! ├── coordinator.rs  - Process-wide handle and broker I/O task
//! ├── dispatcher.rs   - Payload decoding, isolated callback invocation
//! ├── bridge.rs       - Hand-off into the consumer context
//! └── error.rs        - Failure taxonomy
//! ```
//!
//! ## Execution Contexts
//!
//! Two contexts exist. The broker I/O task reads and writes the wire and is
//! the single owner of the registry; consumers mutate it only through
//! commands. Callback bodies run in the [`ConsumerContext`], one delivery at
//! a time, so entity state is never touched concurrently.
//!
//! ## Delivery Semantics
//!
//! QoS 0 throughout. Publishes while disconnected are dropped, not queued.
//! Subscriptions survive disconnects in the registry and are replayed on
//! every successful connect.

pub mod bridge;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod tls;
pub mod topic;

pub use bridge::ConsumerContext;
pub use config::{BrokerSettings, Protocol};
pub use connection::ConnectionState;
pub use coordinator::Coordinator;
pub use error::BridgeError;
pub use registry::{callback, Callback, MessageHandler};
