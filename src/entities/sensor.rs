//! Text sensors: keypad display lines and SIA4 groups

use tokio::sync::watch;

use super::{Entity, EntityInfo, EntityKind, EntityState, Listener, StateCell, StateValue};
use crate::mqtt::{callback, Coordinator};
use crate::topics::{indexed, TopicScheme};

/// Display lines of the virtual keypad
pub const DISPLAY_LINES: [u8; 2] = [1, 2];

pub struct TextSensor {
    info: EntityInfo,
    listener: Listener,
    state: StateCell,
}

impl TextSensor {
    /// `vkp/display/<line>`; the payload is shown verbatim
    pub fn keypad_display(entry_id: &str, topics: &TopicScheme, line: u8) -> Self {
        Self::new(
            EntityInfo {
                unique_id: format!("{}_keypad_display_line{}", entry_id, line),
                name: format!("Honeywell Galaxy Display Line {}", line),
                kind: EntityKind::Sensor,
                device_class: None,
                icon: Some("mdi:display"),
            },
            topics.keypad_display(line),
            false,
        )
    }

    /// `sia4/groups/<n>`; the payload is trimmed
    pub fn group(entry_id: &str, topics: &TopicScheme, number: u32) -> Self {
        Self::new(
            EntityInfo {
                unique_id: format!("{}_group_{}", entry_id, number),
                name: format!("Group {}", number),
                kind: EntityKind::Sensor,
                device_class: None,
                icon: None,
            },
            indexed(&topics.sia4_groups(), number),
            true,
        )
    }

    fn new(info: EntityInfo, topic: String, trim: bool) -> Self {
        let state = StateCell::new(&info.unique_id, StateValue::Text(String::new()));
        let writer = state.clone();
        let listener = Listener {
            topic,
            callback: callback(move |_topic: &str, payload: &str| {
                let text = if trim { payload.trim() } else { payload };
                writer.set(StateValue::Text(text.to_string()));
                Ok(())
            }),
        };
        Self {
            info,
            listener,
            state,
        }
    }

    pub fn value(&self) -> String {
        self.state.get().to_string()
    }
}

impl Entity for TextSensor {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::test_support::Harness;

    #[test]
    fn display_keeps_payload_and_group_trims() {
        let mut harness = Harness::connected();
        let topics = TopicScheme::new("9");
        let line = TextSensor::keypad_display("entry", &topics, 1);
        let group = TextSensor::group("entry", &topics, 4);
        line.attach(&harness.coordinator);
        group.attach(&harness.coordinator);

        harness.deliver("selfmon/vmod.9/vkp/display/1", " 12:00 UNSET  ");
        harness.deliver("selfmon/vmod.9/sia4/groups/4", " SET \n");

        assert_eq!(line.value(), " 12:00 UNSET  ");
        assert_eq!(group.value(), "SET");
        assert_eq!(line.info().unique_id, "entry_keypad_display_line1");
        assert_eq!(group.info().name, "Group 4");
    }
}
