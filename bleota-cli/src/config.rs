//! Configuration file support for bleota.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (BLEOTA_*)
//! 3. Config file given with `--config`
//! 4. Local config file (./bleota.toml)
//! 5. Global config file (~/.config/bleota/config.toml)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bleota::{DiscoveredDevice, OtaKind, UploadConfig};
use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "bleota.toml";

/// Default scan duration in seconds.
pub const DEFAULT_SCAN_SECS: u64 = 5;

/// Preferred device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Advertised name (substring match).
    pub name: Option<String>,
    /// Platform address or identifier.
    pub address: Option<String>,
    /// How long to scan before connecting.
    pub scan_secs: Option<u64>,
}

/// Upload defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadSection {
    /// Image kind ("app" or "spiffs").
    pub kind: Option<String>,
    /// Acknowledgment timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Packet size cap in bytes.
    pub packet_size: Option<usize>,
    /// Retry budget for command frames.
    pub command_retries: Option<u32>,
    /// Retry budget for sectors.
    pub sector_retries: Option<u32>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Device selection.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Upload settings.
    #[serde(default)]
    pub upload: UploadSection,
}

impl Config {
    /// Load the global and local configuration files.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load the default sources, then the file given with `--config`.
    pub fn load_with(path: Option<&Path>) -> Self {
        let mut config = Self::load();
        if let Some(path) = path {
            config.merge(Self::load_from_path(path));
        }
        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!(
                        "Failed to parse TOML config file {}: {}",
                        path.display(),
                        e
                    );
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "bleota").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        // Device
        if other.device.name.is_some() {
            self.device.name = other.device.name;
        }
        if other.device.address.is_some() {
            self.device.address = other.device.address;
        }
        if other.device.scan_secs.is_some() {
            self.device.scan_secs = other.device.scan_secs;
        }

        // Upload
        let upload = other.upload;
        if upload.kind.is_some() {
            self.upload.kind = upload.kind;
        }
        if upload.timeout_ms.is_some() {
            self.upload.timeout_ms = upload.timeout_ms;
        }
        if upload.packet_size.is_some() {
            self.upload.packet_size = upload.packet_size;
        }
        if upload.command_retries.is_some() {
            self.upload.command_retries = upload.command_retries;
        }
        if upload.sector_retries.is_some() {
            self.upload.sector_retries = upload.sector_retries;
        }
    }

    /// Configured device pattern, address first.
    pub fn device_target(&self) -> Option<&str> {
        self.device
            .address
            .as_deref()
            .or(self.device.name.as_deref())
    }

    /// Configured scan duration.
    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.device.scan_secs.unwrap_or(DEFAULT_SCAN_SECS))
    }

    /// Upload settings from the config files, before command-line overrides.
    pub fn upload_config(&self) -> bleota::Result<UploadConfig> {
        let mut config = UploadConfig::default();
        if let Some(kind) = &self.upload.kind {
            config = config.with_kind(kind.parse::<OtaKind>()?);
        }
        if let Some(ms) = self.upload.timeout_ms {
            config = config.with_ack_timeout(Duration::from_millis(ms));
        }
        if let Some(size) = self.upload.packet_size {
            config = config.with_packet_size(size);
        }
        if let Some(retries) = self.upload.command_retries {
            config = config.with_command_retries(retries);
        }
        if let Some(retries) = self.upload.sector_retries {
            config = config.with_sector_retries(retries);
        }
        Ok(config)
    }

    /// Remember `device` as the preferred device.
    ///
    /// Written to the local file if one exists, otherwise to the global one.
    pub fn remember_device(&mut self, device: &DiscoveredDevice) -> anyhow::Result<PathBuf> {
        self.device.address = Some(device.address.clone());
        self.device.name = Some(device.name.clone());

        let path = if Path::new(LOCAL_CONFIG_FILE).exists() {
            PathBuf::from(LOCAL_CONFIG_FILE)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from(LOCAL_CONFIG_FILE)
        };

        // Keep whatever else the target file holds.
        let mut stored = Self::load_from_file(&path).unwrap_or_default();
        stored.device.address = self.device.address.clone();
        stored.device.name = self.device.name.clone();

        let content = toml::to_string_pretty(&stored)?;
        fs::write(&path, content)?;
        info!("Saved device to {}", path.display());

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.device_target().is_none());
        assert_eq!(config.scan_duration(), Duration::from_secs(DEFAULT_SCAN_SECS));
        assert_eq!(config.upload_config().unwrap(), UploadConfig::default());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[device]
name = "OTA-Sensor"
address = "AA:BB:CC:DD:EE:FF"
scan_secs = 3

[upload]
kind = "spiffs"
timeout_ms = 8000
packet_size = 244
sector_retries = 2
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device_target(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(config.scan_duration(), Duration::from_secs(3));

        let upload = config.upload_config().unwrap();
        assert_eq!(upload.kind, OtaKind::Spiffs);
        assert_eq!(upload.ack_timeout, Duration::from_millis(8000));
        assert_eq!(upload.packet_size, 244);
        assert_eq!(upload.command_retries, 0);
        assert_eq!(upload.sector_retries, 2);
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_unknown_kind_is_config_error() {
        let mut config = Config::default();
        config.upload.kind = Some("bootloader".into());
        assert!(matches!(
            config.upload_config(),
            Err(bleota::Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_merge_overrides_only_present_values() {
        let mut base = Config::default();
        base.device.name = Some("Sensor".into());
        base.upload.timeout_ms = Some(3000);

        let mut other = Config::default();
        other.upload.timeout_ms = Some(9000);
        base.merge(other);

        assert_eq!(base.device.name.as_deref(), Some("Sensor"));
        assert_eq!(base.upload.timeout_ms, Some(9000));
        assert_eq!(base.device_target(), Some("Sensor"));
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[device]\nname = \"Bench\"\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.device.name.as_deref(), Some("Bench"));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        assert_eq!(Config::load_from_path(&path), Config::default());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.device.name.is_none());
    }

    #[test]
    fn test_global_config_path_names_app() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_string_lossy().contains("bleota"));
            assert!(p.to_string_lossy().ends_with("config.toml"));
        }
    }
}
