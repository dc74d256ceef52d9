//! TOML configuration file parsing

use serde::Deserialize;
use std::path::PathBuf;

use crate::config::PluginConfig;
use crate::error::ConfigError;

/// TOML configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct TomlConfig {
    pub bridge_name: Option<String>,
    pub pool_file: Option<PathBuf>,
    pub dns: Option<DnsSection>,
    pub logging: Option<LoggingConfig>,
}

/// `[dns]` table
#[derive(Debug, Deserialize)]
pub struct DnsSection {
    pub nameservers: Option<Vec<String>>,
    pub domain: Option<String>,
    pub search: Option<Vec<String>>,
    pub options: Option<Vec<String>>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<PathBuf>,
}

impl TomlConfig {
    /// Apply file values over base configuration
    pub fn apply_to_config(self, mut base_config: PluginConfig) -> Result<PluginConfig, ConfigError> {
        if let Some(bridge) = self.bridge_name {
            base_config.bridge_name = bridge;
        }
        if let Some(pool_file) = self.pool_file {
            base_config.pool_file = pool_file;
        }

        if let Some(dns) = self.dns {
            if let Some(nameservers) = dns.nameservers {
                base_config.dns.nameservers = nameservers;
            }
            if dns.domain.is_some() {
                base_config.dns.domain = dns.domain;
            }
            if let Some(search) = dns.search {
                base_config.dns.search = search;
            }
            if let Some(options) = dns.options {
                base_config.dns.options = options;
            }
        }

        if let Some(logging) = self.logging {
            if let Some(level) = logging.level {
                base_config.log_level = level;
            }
            if let Some(format) = logging.format {
                base_config.log_format = format;
            }
            if logging.file.is_some() {
                base_config.log_file = logging.file;
            }
        }

        Ok(base_config)
    }
}

/// Load configuration from TOML file
pub fn load_toml_config(path: &str) -> Result<TomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| ConfigError::FileNotFound { path: path.to_string() })?;

    parse_toml_config(&content)
}

pub fn parse_toml_config(content: &str) -> Result<TomlConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()))
}
