//! Configuration management module
//!
//! Handles loading configuration from multiple sources with proper precedence:
//! CLI arguments > environment variables > stdin network configuration >
//! TOML files > defaults

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::cni::{Dns, NetConf};
use crate::error::ConfigError;

pub mod cli;
pub mod env;
pub mod toml;

use self::cli::CliArgs;

/// Configuration file read when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cni/veth-bridge.toml";

/// Longest name the kernel accepts for a link
pub const MAX_INTERFACE_NAME: usize = 15;

const LOG_FORMATS: &[&str] = &["text", "json"];

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    pub bridge_name: String,
    pub pool_file: PathBuf,
    pub dns: Dns,
    pub log_level: String,
    pub log_format: String,
    pub log_file: Option<PathBuf>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            bridge_name: "vbr0".to_string(),
            pool_file: PathBuf::from("/var/lib/cni/veth-bridge/pool.json"),
            dns: Dns {
                nameservers: vec!["10.96.0.10".to_string()],
                domain: None,
                search: vec![
                    "svc.cluster.local".to_string(),
                    "cluster.local".to_string(),
                    "local".to_string(),
                ],
                options: Vec::new(),
            },
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            log_file: None,
        }
    }
}

impl PluginConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "bridge name must not be empty".to_string(),
            ));
        }
        if self.bridge_name.len() > MAX_INTERFACE_NAME {
            return Err(ConfigError::ValidationError(format!(
                "bridge name '{}' exceeds {} bytes",
                self.bridge_name, MAX_INTERFACE_NAME
            )));
        }
        if self.pool_file.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "pool file path must not be empty".to_string(),
            ));
        }
        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown log format '{}', expected one of {}",
                self.log_format,
                LOG_FORMATS.join(", ")
            )));
        }
        for server in &self.dns.nameservers {
            server.parse::<Ipv4Addr>().map_err(|_| {
                ConfigError::ValidationError(format!("invalid nameserver '{}'", server))
            })?;
        }
        Ok(())
    }

    /// Overlay the values carried by the network configuration document
    pub fn apply_netconf(mut self, netconf: &NetConf) -> Self {
        if let Some(ref bridge) = netconf.bridge {
            self.bridge_name = bridge.clone();
        }
        if let Some(path) = netconf.ipam.as_ref().and_then(|ipam| ipam.data_file.as_ref()) {
            self.pool_file = path.clone();
        }
        if let Some(ref dns) = netconf.dns {
            self.dns = dns.clone();
        }
        self
    }
}

/// Build the effective configuration from every source
pub fn load_config(cli: &CliArgs, netconf: &NetConf) -> Result<PluginConfig, ConfigError> {
    let mut config = PluginConfig::default();

    let file = match cli.config {
        Some(ref path) => Some(PathBuf::from(path)),
        None => Some(PathBuf::from(DEFAULT_CONFIG_PATH)).filter(|p| p.exists()),
    };
    if let Some(path) = file {
        config = load_file(&path)?.apply_to_config(config)?;
    }

    config = config.apply_netconf(netconf);
    config = env::apply_env_config(config)?;
    config = cli.apply_to_config(config)?;

    config.validate()?;
    Ok(config)
}

fn load_file(path: &Path) -> Result<toml::TomlConfig, ConfigError> {
    toml::load_toml_config(&path.to_string_lossy())
}
