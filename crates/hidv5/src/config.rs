//! Shim configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShimConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub guest: GuestSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID patterns of devices to pass through (empty = every HID device)
    #[serde(default)]
    pub filters: Vec<String>,
    /// Timeout applied to each host transfer, in milliseconds
    #[serde(default = "UsbSettings::default_timeout")]
    pub transfer_timeout_ms: u64,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            transfer_timeout_ms: Self::default_timeout(),
        }
    }
}

impl UsbSettings {
    fn default_timeout() -> u64 {
        1000
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}

/// Guest RAM backing the probe binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestSettings {
    #[serde(default = "GuestSettings::default_ram_size")]
    pub ram_size: usize,
}

impl Default for GuestSettings {
    fn default() -> Self {
        Self {
            ram_size: Self::default_ram_size(),
        }
    }
}

impl GuestSettings {
    fn default_ram_size() -> usize {
        0x10000
    }
}

impl ShimConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![Self::default_path(), PathBuf::from("/etc/rust-hidv5/hidv5.toml")];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ShimConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("rust-hidv5").join("hidv5.toml")
        } else {
            PathBuf::from(".config/rust-hidv5/hidv5.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }

        if self.usb.transfer_timeout_ms == 0 {
            return Err(anyhow!("transfer_timeout_ms must be greater than 0"));
        }

        // Device-info and device-change buffers need room below the guest's top
        if self.guest.ram_size < 0x1000 || self.guest.ram_size > u32::MAX as usize {
            return Err(anyhow!(
                "Invalid guest ram_size {:#x}, must be between 0x1000 and 0xffffffff",
                self.guest.ram_size
            ));
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x057e:0x0306' or '0x057e:*')",
                filter
            ));
        }

        let (vid, pid) = (parts[0], parts[1]);
        if vid != "*" {
            Self::validate_hex_id(vid, "VID")?;
        }
        if pid != "*" {
            Self::validate_hex_id(pid, "PID")?;
        }

        Ok(())
    }

    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
            return Err(anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x057e')",
                name,
                id
            ));
        };

        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))?;

        Ok(())
    }
}

/// Load a configuration file, expanding a leading `~`
pub fn load_config(path: &str) -> Result<ShimConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    ShimConfig::load(Some(path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShimConfig::default();
        assert_eq!(config.logging.level, "info");
        assert!(config.usb.filters.is_empty());
        assert_eq!(config.usb.transfer_timeout(), Duration::from_secs(1));
        assert_eq!(config.guest.ram_size, 0x10000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_filter_valid() {
        assert!(ShimConfig::validate_filter("0x057e:0x0306").is_ok());
        assert!(ShimConfig::validate_filter("0x057e:*").is_ok());
        assert!(ShimConfig::validate_filter("*:0x0306").is_ok());
        assert!(ShimConfig::validate_filter("*:*").is_ok());
        assert!(ShimConfig::validate_filter("0XABCD:0xEF01").is_ok());
    }

    #[test]
    fn test_validate_filter_invalid() {
        assert!(ShimConfig::validate_filter("057e:0306").is_err());
        assert!(ShimConfig::validate_filter("0x057e").is_err());
        assert!(ShimConfig::validate_filter("0x1:0x2:0x3").is_err());
        assert!(ShimConfig::validate_filter("0xGHIJ:0x0306").is_err());
        assert!(ShimConfig::validate_filter("0x12345:0x0306").is_err());
        assert!(ShimConfig::validate_filter("0x:0x0306").is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: ShimConfig = toml::from_str("[usb]\nfilters = [\"0x057e:*\"]\n").unwrap();
        assert_eq!(config.usb.filters, vec!["0x057e:*".to_string()]);
        assert_eq!(config.usb.transfer_timeout_ms, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ShimConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = ShimConfig::default();
        config.usb.transfer_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ShimConfig::default();
        config.guest.ram_size = 0x100;
        assert!(config.validate().is_err());
    }
}
