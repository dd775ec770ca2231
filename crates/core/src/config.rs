//! Transport configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Input-report ring depth requested from the driver at open.
pub const DEFAULT_INPUT_BUFFER_COUNT: u32 = 64;

/// Default read/write wait, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Settings applied when discovering and opening devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub input_buffer_count: u32,
    /// Vendor filter for discovery; 0 matches any.
    pub vendor_id: u16,
    /// Product filter for discovery; 0 matches any.
    pub product_id: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: DEFAULT_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_TIMEOUT_MS,
            input_buffer_count: DEFAULT_INPUT_BUFFER_COUNT,
            vendor_id: 0,
            product_id: 0,
        }
    }
}

impl TransportConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Load a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::Config(format!("{}: {e}", path.display()))),
        };
        Self::from_json(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = TransportConfig::default();
        assert_eq!(c.read_timeout(), Duration::from_secs(1));
        assert_eq!(c.write_timeout(), Duration::from_secs(1));
        assert_eq!(c.input_buffer_count, 64);
        assert_eq!((c.vendor_id, c.product_id), (0, 0));
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let c = TransportConfig::from_json(r#"{"read_timeout_ms": 250, "vendor_id": 4057}"#).unwrap();
        assert_eq!(c.read_timeout_ms, 250);
        assert_eq!(c.vendor_id, 0x0FD9);
        assert_eq!(c.write_timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(c.input_buffer_count, DEFAULT_INPUT_BUFFER_COUNT);
    }

    #[test]
    fn malformed_json_is_config_error() {
        assert!(matches!(
            TransportConfig::from_json("{ read_timeout_ms: "),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("open-deck-config-that-does-not-exist.json");
        assert_eq!(TransportConfig::load(&path).unwrap(), TransportConfig::default());
    }

    #[test]
    fn load_from_file() {
        let path = std::env::temp_dir().join(format!("open-deck-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"write_timeout_ms": 20, "product_id": 108}"#).unwrap();
        let c = TransportConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(c.write_timeout_ms, 20);
        assert_eq!(c.product_id, 0x006C);
    }
}
