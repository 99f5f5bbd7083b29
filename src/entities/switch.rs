//! Virtual RIO zone: a switch the host can open and close

use tokio::sync::watch;
use tracing::debug;

use super::binary::{parse_binary, OPEN};
use super::{Entity, EntityInfo, EntityKind, EntityState, Listener, StateCell, StateValue};
use crate::mqtt::{callback, Coordinator};
use crate::topics::{indexed, TopicScheme};

pub const CLOSED: &str = "CLOSED";

/// Reads `vrio/inputs/read/<n>` and writes `vrio/inputs/write/<n>`.
pub struct VirtualZoneSwitch {
    info: EntityInfo,
    number: u32,
    write_topic: String,
    listener: Listener,
    state: StateCell,
}

impl VirtualZoneSwitch {
    pub fn new(entry_id: &str, topics: &TopicScheme, number: u32, name: Option<String>) -> Self {
        let info = EntityInfo {
            unique_id: format!("{}_vrio_zone_{}", entry_id, number),
            name: name.unwrap_or_else(|| format!("Virtual RIO Zone {}", number)),
            kind: EntityKind::Switch,
            device_class: None,
            icon: None,
        };
        let state = StateCell::new(&info.unique_id, StateValue::Binary(false));
        let writer = state.clone();
        let listener = Listener {
            topic: indexed(&topics.vrio_inputs_read(), number),
            callback: callback(move |_topic: &str, payload: &str| {
                writer.set(StateValue::Binary(parse_binary(payload, OPEN)));
                Ok(())
            }),
        };

        Self {
            info,
            number,
            write_topic: indexed(&topics.vrio_inputs_write(), number),
            listener,
            state,
        }
    }

    pub fn is_on(&self) -> bool {
        self.state.get().is_on()
    }

    /// Opens the zone
    pub fn turn_on(&self, coordinator: &Coordinator) {
        self.set_zone_state(coordinator, true);
    }

    /// Closes the zone
    pub fn turn_off(&self, coordinator: &Coordinator) {
        self.set_zone_state(coordinator, false);
    }

    /// Publishes the command and updates the state optimistically; the read
    /// topic corrects it if the panel disagrees.
    fn set_zone_state(&self, coordinator: &Coordinator, open: bool) {
        let payload = if open { OPEN } else { CLOSED };
        coordinator.publish(&self.write_topic, payload);
        self.state.set(StateValue::Binary(open));
        debug!("Set zone {} to {}", self.number, payload);
    }
}

impl Entity for VirtualZoneSwitch {
    fn info(&self) -> &EntityInfo {
        &self.info
    }

    fn state(&self) -> EntityState {
        self.state.get()
    }

    fn watch(&self) -> watch::Receiver<EntityState> {
        self.state.watch()
    }

    fn attach(&self, coordinator: &Coordinator) {
        self.listener.attach(coordinator);
    }

    fn detach(&self, coordinator: &Coordinator) {
        self.listener.detach(coordinator);
    }
}
