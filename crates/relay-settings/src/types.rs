//! Settings types. JSON keys are camelCase; every field has a default.

use std::time::Duration;

use relay_hub::{EchoPolicy, HubConfig};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Hub limits and timings.
    pub hub: HubSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` picks an ephemeral port.
    pub port: u16,
    /// Origins allowed to upgrade. Empty allows any origin.
    pub allowed_origins: Vec<String>,
    /// Seconds to wait for connections to drain on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: Vec::new(),
            shutdown_timeout_secs: 10,
        }
    }
}

/// Hub limits and timings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Largest inbound message in bytes.
    pub max_message_size: usize,
    /// Outbound queue slots per connection.
    pub send_queue_capacity: usize,
    /// Inbound broadcast channel slots.
    pub inbound_capacity: usize,
    /// Read window in milliseconds.
    pub read_timeout_ms: u64,
    /// Write deadline in milliseconds.
    pub write_timeout_ms: u64,
    /// Heartbeat period in milliseconds.
    pub ping_interval_ms: u64,
    /// Self-delivery policy.
    pub echo: EchoPolicy,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            max_message_size: 512,
            send_queue_capacity: 256,
            inbound_capacity: 256,
            read_timeout_ms: 60_000,
            write_timeout_ms: 10_000,
            ping_interval_ms: 54_000,
            echo: EchoPolicy::All,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive. `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines.
    pub json: bool,
    /// Disconnect log lines allowed per window.
    pub disconnect_burst: u32,
    /// Disconnect log window in seconds.
    pub disconnect_window_secs: u64,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            disconnect_burst: 50,
            disconnect_window_secs: 10,
        }
    }
}

impl RelaySettings {
    /// Reject values the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        let hub = &self.hub;
        let positive = [
            ("hub.maxMessageSize", hub.max_message_size as u64),
            ("hub.sendQueueCapacity", hub.send_queue_capacity as u64),
            ("hub.inboundCapacity", hub.inbound_capacity as u64),
            ("hub.readTimeoutMs", hub.read_timeout_ms),
            ("hub.writeTimeoutMs", hub.write_timeout_ms),
            ("hub.pingIntervalMs", hub.ping_interval_ms),
            ("logging.disconnectBurst", u64::from(self.logging.disconnect_burst)),
            ("logging.disconnectWindowSecs", self.logging.disconnect_window_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(SettingsError::InvalidValue(format!("{name} must be at least 1")));
        }
        if hub.ping_interval_ms >= hub.read_timeout_ms {
            return Err(SettingsError::InvalidValue(format!(
                "hub.pingIntervalMs ({}) must be shorter than hub.readTimeoutMs ({})",
                hub.ping_interval_ms, hub.read_timeout_ms
            )));
        }
        Ok(())
    }

    /// Hub configuration derived from these settings.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_message_size: self.hub.max_message_size,
            send_queue_capacity: self.hub.send_queue_capacity,
            inbound_capacity: self.hub.inbound_capacity,
            read_timeout: Duration::from_millis(self.hub.read_timeout_ms),
            write_timeout: Duration::from_millis(self.hub.write_timeout_ms),
            ping_interval: Duration::from_millis(self.hub.ping_interval_ms),
            echo: self.hub.echo,
            disconnect_log_burst: self.logging.disconnect_burst,
            disconnect_log_window: Duration::from_secs(self.logging.disconnect_window_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        RelaySettings::default().validate().unwrap();
    }

    #[test]
    fn defaults_match_hub_defaults() {
        let from_settings = RelaySettings::default().hub_config();
        let hub = HubConfig::default();
        assert_eq!(from_settings.max_message_size, hub.max_message_size);
        assert_eq!(from_settings.send_queue_capacity, hub.send_queue_capacity);
        assert_eq!(from_settings.inbound_capacity, hub.inbound_capacity);
        assert_eq!(from_settings.read_timeout, hub.read_timeout);
        assert_eq!(from_settings.write_timeout, hub.write_timeout);
        assert_eq!(from_settings.ping_interval, hub.ping_interval);
        assert_eq!(from_settings.echo, hub.echo);
        assert_eq!(from_settings.disconnect_log_burst, hub.disconnect_log_burst);
        assert_eq!(from_settings.disconnect_log_window, hub.disconnect_log_window);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(RelaySettings::default()).unwrap();
        assert_eq!(json["server"]["allowedOrigins"], serde_json::json!([]));
        assert_eq!(json["server"]["shutdownTimeoutSecs"], 10);
        assert_eq!(json["hub"]["pingIntervalMs"], 54_000);
        assert_eq!(json["hub"]["echo"], "all");
        assert_eq!(json["logging"]["disconnectBurst"], 50);
    }

    #[test]
    fn ping_must_be_shorter_than_read_window() {
        let mut settings = RelaySettings::default();
        settings.hub.ping_interval_ms = settings.hub.read_timeout_ms;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("hub.pingIntervalMs"));
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut settings = RelaySettings::default();
        settings.hub.send_queue_capacity = 0;
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(ref msg) if msg.contains("sendQueueCapacity")));
    }

    #[test]
    fn zero_message_size_rejected() {
        let mut settings = RelaySettings::default();
        settings.hub.max_message_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn hub_config_converts_units() {
        let mut settings = RelaySettings::default();
        settings.hub.read_timeout_ms = 1_500;
        settings.hub.echo = EchoPolicy::ExcludeSender;
        settings.logging.disconnect_window_secs = 3;
        let config = settings.hub_config();
        assert_eq!(config.read_timeout, Duration::from_millis(1_500));
        assert_eq!(config.echo, EchoPolicy::ExcludeSender);
        assert_eq!(config.disconnect_log_window, Duration::from_secs(3));
    }
}
