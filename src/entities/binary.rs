//! Read-only binary entities for zones and outputs

use tokio::sync::watch;

use super::{DeviceClass, Entity, EntityInfo, EntityKind, EntityState, Listener, StateCell, StateValue};
use crate::mqtt::{callback, Coordinator};
use crate::topics::{indexed, TopicScheme};

pub const OPEN: &str = "OPEN";
pub const ON: &str = "ON";

/// True when the trimmed payload equals `on_token`, ignoring case.
///
/// Anything else, including garbage, reads as off / not open.
pub fn parse_binary(payload: &str, on_token: &str) -> bool {
    payload.trim().eq_ignore_ascii_case(on_token)
}

pub struct BinarySensor {
    info: EntityInfo,
    listener: Listener,
    state: StateCell,
}

impl BinarySensor {
    /// Physical RIO zone, `prio/inputs/read/<n>`, open on `OPEN`
    pub fn prio_zone(
        entry_id: &str,
        topics: &TopicScheme,
        number: u32,
        name: Option<String>,
        device_class: DeviceClass,
    ) -> Self {
        Self::new(
            EntityInfo {
                unique_id: format!("{}_prio_zone_{}", entry_id, number),
                name: name.unwrap_or_else(|| format!("Physical RIO Zone {}", number)),
                kind: EntityKind::BinarySensor,
                device_class: Some(device_class),
                icon: None,
            },
            indexed(&topics.prio_inputs_read(), number),
            OPEN,
        )
    }

    /// Physical RIO output, `prio/outputs/<n>`, on with `ON`
    pub fn prio_output(entry_id: &str, topics: &TopicScheme, number: u32, name: Option<String>) -> Self {
        Self::new(
            EntityInfo {
                unique_id: format!("{}_prio_output_{}", entry_id, number),
                name: name.unwrap_or_else(|| format!("Physical RIO Output {}", number)),
                kind: EntityKind::BinarySensor,
                device_class: None,
                icon: None,
            },
            indexed(&topics.prio_outputs(), number),
            ON,
        )
    }

    /// Virtual RIO output, `vrio/outputs/<n>`, on with `ON`
    pub fn vrio_output(entry_id: &str, topics: &TopicScheme, number: u32, name: Option<String>) -> Self {
        Self::new(
            EntityInfo {
                unique_id: format!("{}_vrio_output_{}", entry_id, number),
                name: name.unwrap_or_else(|| format!("Virtual RIO Output {}", number)),
                kind: EntityKind::BinarySensor,
                device_class: None,
                icon: None,
            },
            indexed(&topics.vrio_outputs(), number),
            ON,
        )
    }

    fn new(info: EntityInfo, topic: String, on_token: &'static str) -> Self {
        let state = StateCell::new(&info.unique_id, StateValue::Binary(false));
        let writer = state.clone();
        let listener = Listener {
            topic,
            callback: callback(move |_topic: &str, payload: &str| {
                writer.set(StateValue::Binary(parse_binary(payload, on_token)));
                Ok(())
            }),
        };
        Self {
            info,
            listener,
            state,
        }
    }

    pub fn topic(&self) -> &str {
        &self.listener.topic
    }

    pub fn is_on(&self) -> bool {
        self.state.get().is_on()
    }
}

impl Entity for BinarySensor {
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
    use crate::mqtt::test_support::{Harness, LinkCall};

    #[test]
    fn payload_tokens_are_exact_and_case_insensitive() {
        assert!(parse_binary("OPEN", OPEN));
        assert!(parse_binary(" open \n", OPEN));
        assert!(!parse_binary("CLOSED", OPEN));
        assert!(!parse_binary("FOO", OPEN));
        assert!(!parse_binary("OPENED", OPEN));
        assert!(parse_binary("on", ON));
        assert!(!parse_binary("OFF", ON));
    }

    #[test]
    fn zone_follows_published_payloads() {
        let mut harness = Harness::connected();
        let topics = TopicScheme::new("42");
        let zone = BinarySensor::prio_zone("entry", &topics, 3, None, DeviceClass::Door);
        zone.attach(&harness.coordinator);
        let mut watcher = zone.watch();

        assert_eq!(zone.info().unique_id, "entry_prio_zone_3");
        assert_eq!(zone.info().name, "Physical RIO Zone 3");
        assert!(!zone.is_on());

        assert_eq!(harness.deliver("selfmon/vmod.42/prio/inputs/read/3", "OPEN"), 1);
        assert!(zone.is_on());
        assert!(watcher.has_changed().unwrap());

        harness.deliver("selfmon/vmod.42/prio/inputs/read/3", "CLOSED");
        assert!(!zone.is_on());

        harness.deliver("selfmon/vmod.42/prio/inputs/read/3", "OPEN");
        harness.deliver("selfmon/vmod.42/prio/inputs/read/3", "FOO");
        assert!(!zone.is_on());

        // other zones do not leak into this entity
        harness.deliver("selfmon/vmod.42/prio/inputs/read/4", "OPEN");
        assert!(!zone.is_on());
    }

    #[test]
    fn detach_unsubscribes_on_the_wire() {
        let mut harness = Harness::connected();
        let topics = TopicScheme::new("42");
        let output = BinarySensor::prio_output("entry", &topics, 5, Some("Siren".to_string()));
        output.attach(&harness.coordinator);
        harness.pump();
        assert_eq!(
            harness.link.calls(),
            vec![LinkCall::Subscribe("selfmon/vmod.42/prio/outputs/5".into())]
        );

        harness.deliver("selfmon/vmod.42/prio/outputs/5", "ON");
        assert!(output.is_on());

        output.detach(&harness.coordinator);
        harness.pump();
        assert_eq!(
            harness.link.calls().last(),
            Some(&LinkCall::Unsubscribe("selfmon/vmod.42/prio/outputs/5".into()))
        );
        assert_eq!(harness.deliver("selfmon/vmod.42/prio/outputs/5", "OFF"), 0);
        assert!(output.is_on());
        assert_eq!(output.info().name, "Siren");
    }
}
