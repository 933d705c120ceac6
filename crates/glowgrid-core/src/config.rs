//! Application configuration loading.
//!
//! The config is a single JSON file naming the bind address, an optional UI
//! theme, and the ordered list of devices the panel manages. Device order in
//! the file is significant: form identifiers are assigned from it, so
//! reordering devices changes which form targets which device.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors raised while loading or validating the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON or is missing required fields
    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// UI theme selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Default,
    Catseye,
}

impl Theme {
    /// Parse a theme name, case-insensitively. Returns `None` for names
    /// that don't match a known theme.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "default" => Some(Self::Default),
            "catseye" => Some(Self::Catseye),
            _ => None,
        }
    }

    /// CSS class name for this theme.
    pub fn css_class(&self) -> &'static str {
        match self {
            Self::Default => "theme-default",
            Self::Catseye => "theme-catseye",
        }
    }
}

/// One device entry from the config file.
///
/// `maker`/`model` select the driver and form pairing; `config` is handed to
/// the driver untouched and its shape is driver-specific. `fields` names each
/// controllable datapoint in display order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSetup {
    /// Device maker tag (e.g. "tasmota")
    #[serde(alias = "make")]
    pub maker: String,
    /// Generic model tag (e.g. "outlet", not a vendor part number)
    pub model: String,
    /// Driver-specific connection parameters
    #[serde(default)]
    pub config: serde_json::Value,
    /// Title shown above the device's controls
    pub title: String,
    /// Display name for each field, in order
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host to bind the web server to
    pub host: String,
    /// Port to bind the web server to
    pub port: u16,
    /// UI theme name; unknown names fall back to the default theme
    #[serde(default)]
    pub theme: Option<String>,
    /// Managed devices, in display order
    pub devices: Vec<DeviceSetup>,
}

impl AppConfig {
    /// Load and parse a config file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// The resolved UI theme. An unset or unrecognized theme name yields
    /// the default theme rather than an error.
    pub fn theme(&self) -> Theme {
        self.theme
            .as_deref()
            .and_then(Theme::parse)
            .unwrap_or_default()
    }

    /// Number of configured fields across all devices.
    pub fn field_count(&self) -> usize {
        self.devices.iter().map(|d| d.fields.len()).sum()
    }
}

impl DeviceSetup {
    /// Convenience constructor used by tests and examples.
    pub fn new(maker: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            maker: maker.into(),
            model: model.into(),
            config: serde_json::Value::Null,
            title: String::new(),
            fields: Vec::new(),
        }
    }

    /// Set the driver config payload.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Set the display title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Add a named field.
    pub fn with_field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create temp config");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"{
                "host": "0.0.0.0",
                "port": 8035,
                "theme": "catseye",
                "devices": [
                    {
                        "maker": "tasmota",
                        "model": "outlet",
                        "config": {"broker_host": "127.0.0.1", "topic": "plug1"},
                        "title": "Bedroom Lights",
                        "fields": ["Overhead Light", "Bedside Lamp"]
                    }
                ]
            }"#,
        );

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8035);
        assert_eq!(config.theme(), Theme::Catseye);
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].fields.len(), 2);
        assert_eq!(config.field_count(), 2);
    }

    #[test]
    fn test_missing_devices_is_an_error() {
        let file = write_config(r#"{"host": "127.0.0.1", "port": 8035}"#);
        assert!(matches!(
            AppConfig::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_unknown_theme_falls_back_to_default() {
        let file = write_config(
            r#"{"host": "127.0.0.1", "port": 8035, "theme": "neon", "devices": []}"#,
        );
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.theme(), Theme::Default);
    }

    #[test]
    fn test_make_alias_accepted() {
        // Older config files used "make" instead of "maker"
        let entry: DeviceSetup = serde_json::from_str(
            r#"{"make": "shelly", "model": "plug", "title": "Desk", "fields": ["Desk Lamp"]}"#,
        )
        .unwrap();
        assert_eq!(entry.maker, "shelly");
    }
}
