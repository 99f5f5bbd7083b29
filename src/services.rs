//! Host-invocable actions

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::mqtt::Coordinator;
use crate::topics::TopicScheme;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum ServiceCall {
    /// Publishes an arbitrary payload, for diagnosing the broker link
    #[serde(alias = "test_mqtt")]
    PublishRaw { topic: String, payload: String },
    /// Sends text to the virtual printer
    PrintText { text: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

pub struct Services {
    coordinator: Coordinator,
    topics: TopicScheme,
}

impl Services {
    pub fn new(coordinator: Coordinator, topics: TopicScheme) -> Self {
        Self { coordinator, topics }
    }

    pub fn call(&self, call: ServiceCall) -> Result<(), ServiceError> {
        match call {
            ServiceCall::PublishRaw { topic, payload } => {
                if topic.is_empty() {
                    return Err(reject("publish_raw", ServiceError::MissingField("topic")));
                }
                if payload.is_empty() {
                    return Err(reject("publish_raw", ServiceError::MissingField("payload")));
                }
                info!(
                    "Raw publish: topic={}, payload={}, connected={}",
                    topic,
                    payload,
                    self.coordinator.is_connected()
                );
                self.coordinator.publish(&topic, &payload);
            }
            ServiceCall::PrintText { text } => {
                if text.is_empty() {
                    return Err(reject("print_text", ServiceError::MissingField("text")));
                }
                self.coordinator.publish(&self.topics.printer_print(), &text);
                info!("Printed text to virtual printer: {}", text);
            }
        }
        Ok(())
    }
}

fn reject(service: &str, err: ServiceError) -> ServiceError {
    error!("Rejected {} call: {}", service, err);
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::test_support::Harness;

    #[test]
    fn print_text_targets_the_printer() {
        let mut harness = Harness::connected();
        let services = Services::new(harness.coordinator.clone(), TopicScheme::new("11"));

        services
            .call(ServiceCall::PrintText {
                text: "HELLO".to_string(),
            })
            .unwrap();
        harness.pump();
        assert_eq!(
            harness.link.published(),
            vec![("selfmon/vmod.11/vprinter/print".to_string(), "HELLO".to_string())]
        );
    }

    #[test]
    fn empty_fields_are_rejected_without_publishing() {
        let mut harness = Harness::connected();
        let services = Services::new(harness.coordinator.clone(), TopicScheme::new("11"));

        assert_eq!(
            services.call(ServiceCall::PrintText { text: String::new() }),
            Err(ServiceError::MissingField("text"))
        );
        assert_eq!(
            services.call(ServiceCall::PublishRaw {
                topic: "a/b".to_string(),
                payload: String::new(),
            }),
            Err(ServiceError::MissingField("payload"))
        );
        harness.pump();
        assert!(harness.link.published().is_empty());
    }

    #[test]
    fn legacy_service_name_is_accepted() {
        let call: ServiceCall = toml::from_str("service = \"test_mqtt\"\ntopic = \"x\"\npayload = \"y\"").unwrap();
        assert_eq!(
            call,
            ServiceCall::PublishRaw {
                topic: "x".to_string(),
                payload: "y".to_string(),
            }
        );
    }
}
