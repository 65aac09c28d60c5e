//! Configuration loading and parsing

use anyhow::{Context, Result};
use flight_log_decoder::{MessageTypeFilter, SessionConfig, SinkConfig};
use log::LevelFilter;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Main application configuration (loaded from config.toml)
///
/// Every section is optional; a missing file section keeps its defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub session: SessionSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Default level when no -v/-q flag is given ("error" ... "trace")
    pub level: Option<LevelFilter>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionSection {
    /// Types decoded up front by interactive dataflash sessions
    pub message_types: Option<Vec<String>>,
}

impl AppConfig {
    /// Settings for the interactive controller
    pub fn session_config(&self) -> SessionConfig {
        let filter = match &self.session.message_types {
            Some(types) => MessageTypeFilter::new(types.iter().cloned()),
            None => MessageTypeFilter::builtin(),
        };
        SessionConfig::new()
            .with_message_filter(filter)
            .with_sink(self.sink.clone())
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}
