//! # Entities
//!
//! Stateful representations of the panel's zones, outputs, keypad, printer
//! and groups. Each entity owns a `watch` channel carrying its current
//! [`EntityState`]; the host observes state changes through
//! [`Entity::watch`].
//!
//! ## Lifecycle
//!
//! ```text
//! construct ──► attach(coordinator) ──► ... messages ... ──► detach(coordinator)
//!               (register callback)                          (unregister the same callback)
//! ```
//!
//! Callbacks run on the consumer context, so state updates for one entity
//! are applied in message order and never concurrently.

pub mod binary;
pub mod keypad;
pub mod printer;
pub mod sensor;
pub mod switch;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::watch;
use tracing::debug;

use crate::mqtt::{Callback, Coordinator};

pub use binary::BinarySensor;
pub use keypad::{KeypadButton, KeypadKey};
pub use printer::{PrinterLog, PrinterLogSensor};
pub use sensor::TextSensor;
pub use switch::VirtualZoneSwitch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    BinarySensor,
    Switch,
    Sensor,
    Button,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    Door,
    Motion,
    Smoke,
}

impl DeviceClass {
    /// Maps the configured zone type of a physical zone
    pub fn from_zone_type(zone_type: &str) -> Self {
        match zone_type.trim().to_ascii_lowercase().as_str() {
            "movement" | "motion" | "pir" => DeviceClass::Motion,
            "panic" | "smoke" | "alarm" => DeviceClass::Smoke,
            _ => DeviceClass::Door,
        }
    }
}

/// Static description of an entity as exposed to the host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityInfo {
    pub unique_id: String,
    pub name: String,
    pub kind: EntityKind,
    pub device_class: Option<DeviceClass>,
    pub icon: Option<&'static str>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateValue {
    Binary(bool),
    Text(String),
}

#[derive(Clone, Debug)]
pub struct EntityState {
    pub value: StateValue,
    pub last_changed: DateTime<Local>,
}

impl EntityState {
    fn new(value: StateValue) -> Self {
        Self {
            value,
            last_changed: Local::now(),
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self.value, StateValue::Binary(true))
    }

    pub fn text(&self) -> Option<&str> {
        match &self.value {
            StateValue::Text(text) => Some(text),
            StateValue::Binary(_) => None,
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.value {
            StateValue::Binary(true) => write!(f, "on"),
            StateValue::Binary(false) => write!(f, "off"),
            StateValue::Text(text) => write!(f, "{}", text),
        }
    }
}

/// Shared writer for an entity's state; clones publish to the same channel
#[derive(Clone)]
pub(crate) struct StateCell {
    unique_id: Arc<str>,
    tx: Arc<watch::Sender<EntityState>>,
}

impl StateCell {
    pub(crate) fn new(unique_id: &str, initial: StateValue) -> Self {
        let (tx, _) = watch::channel(EntityState::new(initial));
        Self {
            unique_id: Arc::from(unique_id),
            tx: Arc::new(tx),
        }
    }

    /// Publishes a new value to every observer
    pub(crate) fn set(&self, value: StateValue) {
        debug!("Updated state for {} to {:?}", self.unique_id, value);
        self.tx.send_replace(EntityState::new(value));
    }

    pub(crate) fn get(&self) -> EntityState {
        self.tx.borrow().clone()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<EntityState> {
        self.tx.subscribe()
    }
}

/// The topic an entity listens on together with its registered callback
pub(crate) struct Listener {
    pub(crate) topic: String,
    pub(crate) callback: Callback,
}

impl Listener {
    pub(crate) fn attach(&self, coordinator: &Coordinator) {
        coordinator.subscribe(&self.topic, self.callback.clone());
    }

    pub(crate) fn detach(&self, coordinator: &Coordinator) {
        coordinator.unsubscribe(&self.topic, &self.callback);
    }
}

pub trait Entity: Send + Sync {
    fn info(&self) -> &EntityInfo;

    fn state(&self) -> EntityState;

    fn watch(&self) -> watch::Receiver<EntityState>;

    /// Registers the entity's callback. Call once per entity.
    fn attach(&self, coordinator: &Coordinator);

    /// Removes the callback registered by [`Entity::attach`].
    fn detach(&self, coordinator: &Coordinator);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_types_map_to_device_classes() {
        assert_eq!(DeviceClass::from_zone_type("PIR"), DeviceClass::Motion);
        assert_eq!(DeviceClass::from_zone_type("movement"), DeviceClass::Motion);
        assert_eq!(DeviceClass::from_zone_type("smoke"), DeviceClass::Smoke);
        assert_eq!(DeviceClass::from_zone_type("panic"), DeviceClass::Smoke);
        assert_eq!(DeviceClass::from_zone_type("contact"), DeviceClass::Door);
        assert_eq!(DeviceClass::from_zone_type(""), DeviceClass::Door);
    }

    #[test]
    fn state_cell_notifies_watchers() {
        let cell = StateCell::new("entry_prio_zone_1", StateValue::Binary(false));
        let mut rx = cell.watch();
        assert!(!rx.has_changed().unwrap());

        cell.set(StateValue::Binary(true));
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_on());
        assert_eq!(cell.get().to_string(), "on");
    }
}
