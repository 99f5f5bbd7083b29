//! Builds and owns every entity of one gateway

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{GalaxyConfig, OutputConfig, ZoneConfig};
use crate::discovery::discover;
use crate::entities::sensor::DISPLAY_LINES;
use crate::entities::{
    BinarySensor, Entity, KeypadButton, KeypadKey, PrinterLogSensor, TextSensor,
    VirtualZoneSwitch,
};
use crate::mqtt::Coordinator;
use crate::services::Services;

pub struct GalaxyPlatform {
    coordinator: Coordinator,
    entities: Vec<Arc<dyn Entity>>,
    switches: Vec<Arc<VirtualZoneSwitch>>,
    buttons: Vec<Arc<KeypadButton>>,
    printer: Arc<PrinterLogSensor>,
    services: Services,
}

/// Configured items, or discovered numbers with default names
fn zones_or_discovered(configured: &[ZoneConfig], discovered: BTreeSet<u32>) -> Vec<ZoneConfig> {
    if !configured.is_empty() {
        return configured.to_vec();
    }
    discovered
        .into_iter()
        .map(|number| ZoneConfig {
            number,
            name: None,
            zone_type: None,
        })
        .collect()
}

fn outputs_or_discovered(configured: &[OutputConfig], discovered: BTreeSet<u32>) -> Vec<OutputConfig> {
    if !configured.is_empty() {
        return configured.to_vec();
    }
    discovered
        .into_iter()
        .map(|number| OutputConfig { number, name: None })
        .collect()
}

impl GalaxyPlatform {
    /// Discovers what the configuration leaves open, creates the entities
    /// and attaches them to the coordinator.
    pub async fn setup(coordinator: Coordinator, config: &GalaxyConfig, cancel: &CancellationToken) -> Self {
        let entry_id = config.entry_id.as_str();
        let topics = config.topics();
        let settings = config.discovery_settings();
        let options = &config.options;

        let maybe_discover = |needed: bool, base: String| {
            let coordinator = coordinator.clone();
            async move {
                if needed {
                    discover(&coordinator, &base, settings, cancel).await
                } else {
                    BTreeSet::new()
                }
            }
        };

        let (prio_zones, prio_outputs, vrio_outputs, vrio_zones, groups) = tokio::join!(
            maybe_discover(options.physical_rio_zones.is_empty(), topics.prio_inputs_read()),
            maybe_discover(options.physical_rio_outputs.is_empty(), topics.prio_outputs()),
            maybe_discover(options.virtual_rio_outputs.is_empty(), topics.vrio_outputs()),
            maybe_discover(options.virtual_rio_zones.is_empty(), topics.vrio_inputs_read()),
            maybe_discover(true, topics.sia4_groups()),
        );

        let mut entities: Vec<Arc<dyn Entity>> = Vec::new();

        for zone in zones_or_discovered(&options.physical_rio_zones, prio_zones) {
            let device_class = zone.device_class();
            entities.push(Arc::new(BinarySensor::prio_zone(
                entry_id,
                &topics,
                zone.number,
                zone.name,
                device_class,
            )));
        }
        for output in outputs_or_discovered(&options.physical_rio_outputs, prio_outputs) {
            entities.push(Arc::new(BinarySensor::prio_output(entry_id, &topics, output.number, output.name)));
        }
        for output in outputs_or_discovered(&options.virtual_rio_outputs, vrio_outputs) {
            entities.push(Arc::new(BinarySensor::vrio_output(entry_id, &topics, output.number, output.name)));
        }

        let mut switches = Vec::new();
        for zone in outputs_or_discovered(&options.virtual_rio_zones, vrio_zones) {
            let switch = Arc::new(VirtualZoneSwitch::new(entry_id, &topics, zone.number, zone.name));
            entities.push(switch.clone());
            switches.push(switch);
        }

        if entities.is_empty() {
            warn!("No zones or outputs configured or discovered for vmod.{}", config.vmodid);
        }

        for line in DISPLAY_LINES {
            entities.push(Arc::new(TextSensor::keypad_display(entry_id, &topics, line)));
        }
        let printer = Arc::new(PrinterLogSensor::new(entry_id, &topics));
        entities.push(printer.clone());
        for group in groups {
            entities.push(Arc::new(TextSensor::group(entry_id, &topics, group)));
        }

        let mut buttons = Vec::new();
        for key in KeypadKey::all() {
            let button = Arc::new(KeypadButton::new(entry_id, &topics, *key));
            entities.push(button.clone());
            buttons.push(button);
        }

        for entity in &entities {
            entity.attach(&coordinator);
        }
        info!("Set up {} entities for vmod.{}", entities.len(), config.vmodid);

        Self {
            services: Services::new(coordinator.clone(), topics),
            coordinator,
            entities,
            switches,
            buttons,
            printer,
        }
    }

    /// Detaches every entity. The coordinator stays up.
    pub fn unload(&self) {
        for entity in &self.entities {
            entity.detach(&self.coordinator);
        }
        info!("Unloaded {} entities", self.entities.len());
    }

    pub fn entities(&self) -> &[Arc<dyn Entity>] {
        &self.entities
    }

    pub fn entity(&self, unique_id: &str) -> Option<&Arc<dyn Entity>> {
        self.entities.iter().find(|e| e.info().unique_id == unique_id)
    }

    pub fn switches(&self) -> &[Arc<VirtualZoneSwitch>] {
        &self.switches
    }

    pub fn buttons(&self) -> &[Arc<KeypadButton>] {
        &self.buttons
    }

    pub fn printer(&self) -> &PrinterLogSensor {
        &self.printer
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }
}
