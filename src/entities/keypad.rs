//! Virtual keypad buttons

use chrono::Local;
use tokio::sync::watch;
use tracing::info;

use super::{Entity, EntityInfo, EntityKind, EntityState, StateCell, StateValue};
use crate::mqtt::Coordinator;
use crate::topics::TopicScheme;

/// A key on the Galaxy keypad, in panel layout order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeypadKey {
    pub key: char,
    pub name: &'static str,
    pub icon: &'static str,
}

pub const KEYPAD_KEYS: [KeypadKey; 16] = [
    KeypadKey { key: '1', name: "Key 1", icon: "mdi:numeric-1" },
    KeypadKey { key: '2', name: "Key 2", icon: "mdi:numeric-2" },
    KeypadKey { key: '3', name: "Key 3", icon: "mdi:numeric-3" },
    KeypadKey { key: 'A', name: "Key A>", icon: "mdi:arrow-right-bold" },
    KeypadKey { key: '4', name: "Key 4", icon: "mdi:numeric-4" },
    KeypadKey { key: '5', name: "Key 5", icon: "mdi:numeric-5" },
    KeypadKey { key: '6', name: "Key 6", icon: "mdi:numeric-6" },
    KeypadKey { key: 'B', name: "Key B<", icon: "mdi:arrow-left-bold" },
    KeypadKey { key: '7', name: "Key 7", icon: "mdi:numeric-7" },
    KeypadKey { key: '8', name: "Key 8", icon: "mdi:numeric-8" },
    KeypadKey { key: '9', name: "Key 9", icon: "mdi:numeric-9" },
    KeypadKey { key: 'E', name: "Enter", icon: "mdi:check" },
    KeypadKey { key: '*', name: "Asterisk", icon: "mdi:asterisk" },
    KeypadKey { key: '0', name: "Key 0", icon: "mdi:numeric-0" },
    KeypadKey { key: '#', name: "Hash", icon: "mdi:pound" },
    KeypadKey { key: 'X', name: "Escape", icon: "mdi:close" },
];

impl KeypadKey {
    pub fn all() -> &'static [KeypadKey] {
        &KEYPAD_KEYS
    }

    pub fn find(key: char) -> Option<KeypadKey> {
        KEYPAD_KEYS
            .iter()
            .copied()
            .find(|k| k.key == key.to_ascii_uppercase())
    }

    /// Identifier fragment used in unique ids
    pub fn key_name(&self) -> String {
        match self.key {
            'A' => "key_a".to_string(),
            'B' => "key_b".to_string(),
            'E' => "enter".to_string(),
            'X' => "escape".to_string(),
            '*' => "asterisk".to_string(),
            '#' => "hash".to_string(),
            other => other.to_string(),
        }
    }
}

/// Stateless button; the state only records when it was last pressed
pub struct KeypadButton {
    info: EntityInfo,
    key: KeypadKey,
    topic: String,
    state: StateCell,
}

impl KeypadButton {
    pub fn new(entry_id: &str, topics: &TopicScheme, key: KeypadKey) -> Self {
        let info = EntityInfo {
            unique_id: format!("{}_keypad_button_{}", entry_id, key.key_name()),
            name: format!("Honeywell Galaxy {}", key.name),
            kind: EntityKind::Button,
            device_class: None,
            icon: Some(key.icon),
        };
        let state = StateCell::new(&info.unique_id, StateValue::Text(String::new()));
        Self {
            info,
            key,
            topic: topics.keypad_key(),
            state,
        }
    }

    pub fn key(&self) -> KeypadKey {
        self.key
    }

    /// Publishes the key character once. Failures are logged by the
    /// coordinator.
    pub fn press(&self, coordinator: &Coordinator) {
        info!("Button pressed: {}, publishing to {}", self.key.key, self.topic);
        coordinator.publish(&self.topic, &self.key.key.to_string());
        self.state.set(StateValue::Text(Local::now().to_rfc3339()));
    }
}

impl Entity for KeypadButton {
    fn info(&self) -> &EntityInfo {
        &self.info
    }

    fn state(&self) -> EntityState {
        self.state.get()
    }

    fn watch(&self) -> watch::Receiver<EntityState> {
        self.state.watch()
    }

    fn attach(&self, _coordinator: &Coordinator) {}

    fn detach(&self, _coordinator: &Coordinator) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::test_support::{Harness, LinkCall};

    #[test]
    fn key_names_follow_the_keypad_legend() {
        let names: Vec<String> = KeypadKey::all().iter().map(KeypadKey::key_name).collect();
        assert_eq!(
            names,
            vec![
                "1", "2", "3", "key_a", "4", "5", "6", "key_b", "7", "8", "9", "enter", "asterisk", "0",
                "hash", "escape"
            ]
        );
        assert_eq!(KeypadKey::find('e').map(|k| k.name), Some("Enter"));
        assert_eq!(KeypadKey::find('Z'), None);
    }

    #[test]
    fn press_publishes_exactly_once() {
        let mut harness = Harness::connected();
        let topics = TopicScheme::new("5");
        let key = KeypadKey::find('A').unwrap();
        let button = KeypadButton::new("entry", &topics, key);
        assert_eq!(button.info().unique_id, "entry_keypad_button_key_a");
        assert_eq!(button.info().name, "Honeywell Galaxy Key A>");

        button.press(&harness.coordinator);
        harness.pump();
        assert_eq!(
            harness.link.calls(),
            vec![LinkCall::Publish("selfmon/vmod.5/vkp/key".into(), "A".into())]
        );
        assert!(!button.state().text().unwrap_or_default().is_empty());
    }

    #[test]
    fn press_while_disconnected_does_not_reach_the_wire() {
        let mut harness = Harness::new();
        let topics = TopicScheme::new("5");
        let button = KeypadButton::new("entry", &topics, KeypadKey::find('#').unwrap());

        button.press(&harness.coordinator);
        harness.pump();
        assert!(harness.link.calls().is_empty());
    }
}
