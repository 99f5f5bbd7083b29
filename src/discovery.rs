//! Discovery of numbered zones, outputs and groups
//!
//! The gateway publishes every item under `<base>/<n>`. Discovery listens on
//! `<base>/+` for a fixed window and reports the numbers it saw.
//!
//! ```text
//! Waiting ──connected──► Collecting ──window elapsed / cancelled──► Finished
//!    │                                                                ▲
//!    └────────────── timeout / cancelled (empty result) ─────────────┘
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use statum::{machine, state};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mqtt::topic::trailing_segment;
use crate::mqtt::{callback, Callback, Coordinator};
use crate::topics::wildcard;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub connect_timeout: Duration,
    pub window: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            window: Duration::from_secs(10),
        }
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum DiscoveryPhase {
    Waiting,
    Collecting,
    Finished,
}

#[machine]
pub struct Discovery<S: DiscoveryPhase> {
    coordinator: Coordinator,
    pattern: String,
    settings: DiscoverySettings,

    // Set while collecting
    listener: Option<Callback>,
    receiver: Option<mpsc::UnboundedReceiver<u32>>,

    found: BTreeSet<u32>,
}

impl<S: DiscoveryPhase> Discovery<S> {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl Discovery<Waiting> {
    pub fn start(coordinator: &Coordinator, base_topic: &str, settings: DiscoverySettings) -> Self {
        Self::new(
            coordinator.clone(),
            wildcard(base_topic),
            settings,
            None,
            None,
            BTreeSet::new(),
        )
    }

    /// Waits for the broker session, then subscribes the discovery pattern.
    pub async fn connected(
        mut self,
        cancel: &CancellationToken,
    ) -> Result<Discovery<Collecting>, Discovery<Finished>> {
        if !self
            .coordinator
            .wait_connected(self.settings.connect_timeout, cancel)
            .await
        {
            warn!("MQTT not connected, skipping discovery for {}", self.pattern);
            return Err(self.transition());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let listener = callback(move |topic: &str, _payload: &str| {
            match trailing_segment(topic).parse::<u32>() {
                Ok(number) => {
                    let _ = tx.send(number);
                }
                Err(_) => debug!("Ignoring non-numeric discovery topic {}", topic),
            }
            Ok(())
        });

        info!("Discovering on {} for {:?}", self.pattern, self.settings.window);
        self.coordinator.subscribe(&self.pattern, listener.clone());
        self.listener = Some(listener);
        self.receiver = Some(rx);
        Ok(self.transition())
    }
}

impl Discovery<Collecting> {
    /// Collects numbers until the window closes or `cancel` fires, then
    /// removes the discovery subscription.
    pub async fn collect(mut self, cancel: &CancellationToken) -> Discovery<Finished> {
        if let Some(mut rx) = self.receiver.take() {
            let deadline = tokio::time::sleep(self.settings.window);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("Discovery on {} cancelled", self.pattern);
                        break;
                    }
                    Some(number) = rx.recv() => {
                        self.found.insert(number);
                    }
                    _ = &mut deadline => break,
                }
            }
            while let Ok(number) = rx.try_recv() {
                self.found.insert(number);
            }
        }

        if let Some(listener) = self.listener.take() {
            self.coordinator.unsubscribe(&self.pattern, &listener);
        }
        self.transition()
    }
}

impl Discovery<Finished> {
    pub fn into_numbers(self) -> BTreeSet<u32> {
        self.found
    }
}

/// Runs a full discovery on `<base_topic>/+` and returns the sorted,
/// deduplicated item numbers. Empty when the broker never connects.
pub async fn discover(
    coordinator: &Coordinator,
    base_topic: &str,
    settings: DiscoverySettings,
    cancel: &CancellationToken,
) -> BTreeSet<u32> {
    let finished = match Discovery::start(coordinator, base_topic, settings)
        .connected(cancel)
        .await
    {
        Ok(collecting) => collecting.collect(cancel).await,
        Err(finished) => finished,
    };
    let numbers = finished.into_numbers();
    info!("Discovered {} items under {}: {:?}", numbers.len(), base_topic, numbers);
    numbers
}
