use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::packet;
use crate::resolver::{AddressStyle, HostTarget};
use crate::scheduler::DEFAULT_SEND_INTERVAL;
use crate::sequence::DEFAULT_CORRELATION_WINDOW;

/// Tunables for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub interval: Duration,
    /// Payload for scheduled sends, at most `MAX_PAYLOAD_LEN` bytes.
    pub payload: Vec<u8>,
    /// How many recent sequence numbers a reply may match.
    pub correlation_window: u16,
    /// Scheduled sends stop after this many; replies are still received.
    pub count: Option<u64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SEND_INTERVAL,
            payload: packet::default_payload(),
            correlation_window: DEFAULT_CORRELATION_WINDOW,
            count: None,
        }
    }
}

impl SessionOptions {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the payload, truncated to `MAX_PAYLOAD_LEN`.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        let mut payload = payload.into();
        if payload.len() > packet::MAX_PAYLOAD_LEN {
            log::warn!(
                "payload of {} bytes truncated to {}",
                payload.len(),
                packet::MAX_PAYLOAD_LEN
            );
            payload.truncate(packet::MAX_PAYLOAD_LEN);
        }
        self.payload = payload;
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_correlation_window(mut self, window: u16) -> Self {
        self.correlation_window = window.max(1);
        self
    }
}

fn default_address_style() -> AddressStyle {
    AddressStyle::Any
}

fn default_interval_ms() -> u64 {
    DEFAULT_SEND_INTERVAL.as_millis() as u64
}

fn default_payload_size() -> usize {
    packet::DEFAULT_PAYLOAD_LEN
}

fn default_correlation_window() -> u16 {
    DEFAULT_CORRELATION_WINDOW
}

/// Persisted settings of the command line front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub target: String,
    #[serde(default = "default_address_style")]
    pub address_style: AddressStyle,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
    #[serde(default = "default_correlation_window")]
    pub correlation_window: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target: "8.8.8.8".to_string(),
            address_style: default_address_style(),
            interval_ms: default_interval_ms(),
            payload_size: default_payload_size(),
            correlation_window: default_correlation_window(),
        }
    }
}

impl AppConfig {
    pub fn get_config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_dir = dirs::config_dir()
            .ok_or("Could not find config directory")?
            .join("PingSession");

        fs::create_dir_all(&config_dir)?;
        Ok(config_dir.join("config.json"))
    }

    /// Loads the saved configuration, or the defaults if there is none.
    pub fn load() -> Self {
        Self::get_config_path()
            .ok()
            .and_then(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let content = fs::read_to_string(path)
            .map_err(|e| log::warn!("Failed to read config {}: {e}", path.display()))
            .ok()?;
        serde_json::from_str::<AppConfig>(&content)
            .map_err(|e| log::warn!("Failed to parse config {}: {e}", path.display()))
            .ok()
    }

    pub fn save(&self) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let path = Self::get_config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn host_target(&self) -> HostTarget {
        HostTarget::new(self.target.clone(), self.address_style)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions::default()
            .with_interval(Duration::from_millis(self.interval_ms))
            .with_payload(packet::sized_payload(
                self.payload_size.min(packet::MAX_PAYLOAD_LEN),
            ))
            .with_correlation_window(self.correlation_window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ping-session-{}-{name}", std::process::id()))
    }

    #[test]
    fn defaults() {
        let config = AppConfig::default();
        assert_eq!(config.target, "8.8.8.8");
        assert_eq!(config.address_style, AddressStyle::Any);

        let options = config.session_options();
        assert_eq!(options, SessionOptions::default());
        assert_eq!(options.interval, Duration::from_secs(1));
        assert_eq!(options.payload.len(), packet::DEFAULT_PAYLOAD_LEN);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"target":"example.com"}"#).unwrap();
        assert_eq!(config.target, "example.com");
        assert_eq!(config.interval_ms, 1000);
        assert_eq!(config.correlation_window, DEFAULT_CORRELATION_WINDOW);
    }

    #[test]
    fn address_style_spelling() {
        let config: AppConfig =
            serde_json::from_str(r#"{"target":"::1","address_style":"ipv6_only"}"#).unwrap();
        assert_eq!(config.host_target(), HostTarget::new("::1", AddressStyle::Ipv6Only));
    }

    #[test]
    fn save_then_load() {
        let path = scratch_path("roundtrip.json");
        let config = AppConfig {
            target: "192.0.2.1".to_string(),
            address_style: AddressStyle::Ipv4Only,
            interval_ms: 250,
            payload_size: 8,
            correlation_window: 16,
        };
        config.save_to(&path).unwrap();
        let loaded = AppConfig::load_from(&path);
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, Some(config));
    }

    #[test]
    fn unreadable_config_is_ignored() {
        let path = scratch_path("garbage.json");
        fs::write(&path, "not json").unwrap();
        let loaded = AppConfig::load_from(&path);
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, None);
        assert_eq!(AppConfig::load_from(&scratch_path("absent.json")), None);
    }

    #[test]
    fn oversized_payload_is_capped() {
        let options = SessionOptions::default().with_payload(vec![0xff; 200_000]);
        assert_eq!(options.payload.len(), packet::MAX_PAYLOAD_LEN);

        let config = AppConfig {
            payload_size: 500_000,
            ..AppConfig::default()
        };
        assert_eq!(
            config.session_options().payload.len(),
            packet::MAX_PAYLOAD_LEN
        );
    }

    #[test]
    fn options_builder() {
        let options = SessionOptions::default()
            .with_interval(Duration::from_millis(200))
            .with_payload(b"abc".to_vec())
            .with_correlation_window(0)
            .with_count(3);
        assert_eq!(options.interval, Duration::from_millis(200));
        assert_eq!(options.count, Some(3));
        assert_eq!(options.payload, b"abc");
        assert_eq!(options.correlation_window, 1);
    }
}
