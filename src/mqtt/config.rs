use std::path::PathBuf;
use std::time::Duration;

use rumqttc::MqttOptions;
use serde::{Deserialize, Serialize};

use super::error::BridgeError;
use super::tls;

/// Wire protocol requested for the broker connection
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Mqtt,
    Mqtts,
    Ws,
    Wss,
}

/// Everything needed to open one broker session
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Delay before rumqttc retries an established session that dropped
    pub reconnect_delay_secs: u64,
    /// Accept any TLS server certificate. Insecure, off by default.
    pub accept_invalid_certs: bool,
    /// PEM bundle used instead of the platform roots
    pub ca_file: Option<PathBuf>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            protocol: Protocol::Mqtt,
            username: None,
            password: None,
            client_id: "galaxy-bridge".to_string(),
            keep_alive_secs: 60,
            reconnect_delay_secs: 5,
            accept_invalid_certs: false,
            ca_file: None,
        }
    }
}

impl BrokerSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Builds the rumqttc options for this broker.
    ///
    /// Credentials are sent whenever a username or a password is configured,
    /// even an empty one, since some brokers insist on the fields.
    pub fn mqtt_options(&self) -> Result<MqttOptions, BridgeError> {
        if self.host.trim().is_empty() {
            return Err(BridgeError::Connect("empty broker host".to_string()));
        }

        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(5)));

        if self.username.is_some() || self.password.is_some() {
            let username = self.username.clone().unwrap_or_default();
            let password = self.password.clone().unwrap_or_default();
            tracing::debug!(
                "Setting MQTT credentials: username='{}' (password {})",
                username,
                if password.is_empty() { "not set" } else { "set" }
            );
            options.set_credentials(username, password);
        } else {
            tracing::debug!("No MQTT credentials provided, connecting without authentication");
        }

        options.set_transport(tls::transport(self)?);
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_carry_endpoint_and_credentials() {
        let settings = BrokerSettings {
            host: "panel.local".to_string(),
            port: 1884,
            username: Some("galaxy".to_string()),
            password: None,
            ..BrokerSettings::default()
        };
        let options = settings.mqtt_options().expect("valid options");
        assert_eq!(options.broker_address(), ("panel.local".to_string(), 1884));
        assert_eq!(options.client_id(), "galaxy-bridge");
        assert_eq!(
            options.credentials(),
            Some(("galaxy".to_string(), String::new()))
        );
    }

    #[test]
    fn anonymous_when_no_credentials() {
        let options = BrokerSettings::default().mqtt_options().expect("valid options");
        assert_eq!(options.credentials(), None);
    }

    #[test]
    fn empty_host_is_rejected() {
        let settings = BrokerSettings {
            host: "  ".to_string(),
            ..BrokerSettings::default()
        };
        assert!(matches!(settings.mqtt_options(), Err(BridgeError::Connect(_))));
    }
}
