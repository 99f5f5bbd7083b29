//! Error definitions for the MQTT bridge

use thiserror::Error;

/// Failures that can occur between the broker and the registered callbacks.
///
/// None of these propagate past the coordinator. They are returned by the
/// internal operations and logged at the boundary where they are handled.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Bad host/port or a broker refusal other than "not authorized"
    #[error("Connect failure: {0}")]
    Connect(String),

    /// Broker explicitly rejected the credentials
    #[error("Authentication failure: {0}")]
    Auth(String),

    /// Wire-level send error while publishing
    #[error("Publish failure on {topic}: {reason}")]
    Publish { topic: String, reason: String },

    /// Wire-level (un)subscribe error
    #[error("Subscribe failure on {pattern}: {reason}")]
    Subscribe { pattern: String, reason: String },

    /// A registered handler returned an error or panicked
    #[error("Callback failure for {pattern}: {reason}")]
    Callback { pattern: String, reason: String },

    /// Payload was not valid UTF-8
    #[error("Decode failure on {0}")]
    Decode(String),

    #[error("MQTT not connected")]
    NotConnected,

    #[error("MQTT client not initialized")]
    ClientMissing,

    /// The I/O task or the consumer context is gone
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}
