use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub interface: String,
    pub database: String,
    /// Tab-separated OUI table (prefix, short name, manufacturer).
    pub oui_file: String,
    /// CSV probe log appended per accepted sighting.
    pub probe_log: String,
    /// Channels to hop across; empty disables hopping.
    #[serde(default = "default_channels")]
    pub channels: Vec<u8>,
    #[serde(default = "default_hop_interval")]
    pub hop_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker: String,
    pub port: u16,
    pub probe_topic: String,
    pub status_topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub enabled: bool,
    /// Set via NOTIFY_WEBHOOK_URL; empty means log-only.
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
    /// Display wording threshold for the external notifier; the ten-minute
    /// arrival gap is what gates dispatch.
    #[serde(default = "default_returning_hours")]
    pub returning_threshold_hours: u32,
}

fn default_channels() -> Vec<u8> {
    vec![1, 6, 11]
}

fn default_hop_interval() -> u64 {
    250
}

fn default_notify_timeout() -> u64 {
    10
}

fn default_returning_hours() -> u32 {
    24
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            interface: "wlan1".to_string(),
            database: "/var/lib/wuds/probes.db".to_string(),
            oui_file: "data/OUI.txt".to_string(),
            probe_log: "/var/log/wuds/probes.log".to_string(),
            channels: default_channels(),
            hop_interval_ms: default_hop_interval(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        MqttConfig {
            enabled: true,
            broker: "localhost".to_string(),
            port: 1883,
            probe_topic: "wuds/probe".to_string(),
            status_topic: "wuds/status".to_string(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            enabled: true,
            webhook_url: String::new(),
            timeout_secs: default_notify_timeout(),
            returning_threshold_hours: default_returning_hours(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            capture: CaptureConfig::default(),
            mqtt: MqttConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config =
            serde_json::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Environment overrides, applied after file and before CLI flags:
    /// DATABASE_PATH, LOG_PATH, NOTIFY_WEBHOOK_URL.
    pub fn apply_env(&mut self) {
        if let Ok(path) = env::var("DATABASE_PATH") {
            self.capture.database = path;
        }
        if let Ok(path) = env::var("LOG_PATH") {
            self.capture.probe_log = path;
        }
        if let Ok(url) = env::var("NOTIFY_WEBHOOK_URL") {
            self.notify.webhook_url = url;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let json = r#"{
            "capture": {
                "interface": "mon0",
                "database": "./probes.db",
                "oui_file": "./OUI.txt",
                "probe_log": "./probes.log"
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.capture.interface, "mon0");
        assert_eq!(config.capture.channels, vec![1, 6, 11]);
        assert_eq!(config.capture.hop_interval_ms, 250);
        assert!(config.mqtt.enabled);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.notify.timeout_secs, 10);
        assert_eq!(config.notify.returning_threshold_hours, 24);
    }

    #[test]
    fn roundtrips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.capture.interface, config.capture.interface);
        assert_eq!(back.mqtt.probe_topic, config.mqtt.probe_topic);
    }
}
