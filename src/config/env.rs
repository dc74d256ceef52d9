//! Environment variable configuration handling

use std::env;
use std::path::PathBuf;

use crate::config::PluginConfig;
use crate::error::ConfigError;

/// Environment variable prefix
const ENV_PREFIX: &str = "VETH_BRIDGE_";

/// Apply environment variable configuration over base configuration
pub fn apply_env_config(base_config: PluginConfig) -> Result<PluginConfig, ConfigError> {
    apply_env_from(base_config, |key| env::var(key).ok())
}

/// Same as [`apply_env_config`] with an arbitrary variable source
pub fn apply_env_from<F>(mut base_config: PluginConfig, lookup: F) -> Result<PluginConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

    if let Some(bridge) = var("BRIDGE_NAME") {
        base_config.bridge_name = bridge;
    }

    if let Some(pool_file) = var("POOL_FILE") {
        base_config.pool_file = PathBuf::from(pool_file);
    }

    if let Some(level) = var("LOG_LEVEL") {
        base_config.log_level = level;
    }

    if let Some(format) = var("LOG_FORMAT") {
        base_config.log_format = format;
    }

    if let Some(file) = var("LOG_FILE") {
        base_config.log_file = Some(PathBuf::from(file)).filter(|p| !p.as_os_str().is_empty());
    }

    // Format: VETH_BRIDGE_DNS_NAMESERVERS="10.96.0.10,10.96.0.11"
    if let Some(servers) = var("DNS_NAMESERVERS") {
        base_config.dns.nameservers = parse_list_from_env("DNS_NAMESERVERS", &servers)?;
    }

    if let Some(search) = var("DNS_SEARCH") {
        base_config.dns.search = parse_list_from_env("DNS_SEARCH", &search)?;
    }

    if let Some(domain) = var("DNS_DOMAIN") {
        base_config.dns.domain = Some(domain).filter(|d| !d.is_empty());
    }

    Ok(base_config)
}

/// Parse a comma separated list
/// Examples:
/// - "10.96.0.10"
/// - "svc.cluster.local, cluster.local"
pub fn parse_list_from_env(name: &str, list_str: &str) -> Result<Vec<String>, ConfigError> {
    if list_str.trim().is_empty() {
        return Ok(vec![]);
    }

    let mut items = Vec::new();
    for item in list_str.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if item.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidFormat(format!(
                "Invalid entry '{}' in {}{}. Expected a comma separated list",
                item, ENV_PREFIX, name
            )));
        }
        items.push(item.to_string());
    }

    Ok(items)
}
