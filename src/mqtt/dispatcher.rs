//! Dispatch of inbound messages to resolved callbacks
//!
//! Decoding and resolution happen on the broker I/O task; invocation happens
//! on the consumer context once a [`Delivery`] crossed the bridge.

use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Local};
use tracing::{debug, error, warn};

use super::error::BridgeError;
use super::registry::{Callback, Resolved};

/// Decodes a payload as UTF-8, degrading to a lossy rendition.
///
/// Invalid sequences become U+FFFD so that the message is still delivered.
pub fn decode_payload(topic: &str, raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) => text.to_string(),
        Err(e) => {
            warn!(
                "{}, using lossy payload ({} bytes): {}",
                BridgeError::Decode(topic.to_string()),
                raw.len(),
                e
            );
            String::from_utf8_lossy(raw).into_owned()
        }
    }
}

/// One inbound message bound to the callbacks that must see it
pub struct Delivery {
    pub topic: String,
    pub payload: String,
    /// Pattern whose callbacks were selected
    pub pattern: String,
    pub callbacks: Vec<Callback>,
    pub received_at: DateTime<Local>,
}

impl Delivery {
    pub fn new(topic: String, payload: String, resolved: Resolved) -> Self {
        Delivery {
            topic,
            payload,
            pattern: resolved.pattern,
            callbacks: resolved.callbacks,
            received_at: Local::now(),
        }
    }

    /// Invokes every callback in order and returns how many failed.
    ///
    /// An error or panic in one callback is logged and the remaining
    /// callbacks still run.
    pub fn dispatch(&self) -> usize {
        let mut failures = 0;
        for callback in &self.callbacks {
            if let Err(e) = invoke(callback, &self.topic, &self.payload, &self.pattern) {
                error!("{} (topic {})", e, self.topic);
                failures += 1;
            } else {
                debug!("Callback for {} handled {}", self.pattern, self.topic);
            }
        }
        failures
    }
}

fn invoke(callback: &Callback, topic: &str, payload: &str, pattern: &str) -> Result<(), BridgeError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback.handle(topic, payload)));
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(BridgeError::Callback {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        }),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "callback panicked".to_string());
            Err(BridgeError::Callback {
                pattern: pattern.to_string(),
                reason,
            })
        }
    }
}
