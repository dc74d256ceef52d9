//! Command-line argument parsing

use clap::Parser;
use ipnetwork::Ipv4Network;
use std::path::PathBuf;

use crate::config::PluginConfig;
use crate::error::ConfigError;

/// Command-line arguments structure
///
/// The container runtime invokes the plugin without arguments; the flags
/// exist for operators.
#[derive(Parser, Debug, Default)]
#[command(name = "veth-bridge")]
#[command(about = "CNI plugin connecting containers to a host bridge through veth pairs")]
#[command(version)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, help = "Path to TOML configuration file")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, help = "Set the logging level")]
    pub log_level: Option<String>,

    /// Host bridge name
    #[arg(long, help = "Name of the host bridge containers are attached to")]
    pub bridge_name: Option<String>,

    /// Address pool file path
    #[arg(long, help = "Path to the JSON address pool file")]
    pub pool_file: Option<PathBuf>,

    /// Create the pool file for a CIDR and exit
    #[arg(long, value_name = "CIDR", help = "Create an empty address pool for CIDR and exit")]
    pub init_pool: Option<Ipv4Network>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit without handling a CNI command")]
    pub validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    pub print_default_config: bool,
}

impl CliArgs {
    /// Apply CLI arguments over base configuration
    pub fn apply_to_config(&self, mut base_config: PluginConfig) -> Result<PluginConfig, ConfigError> {
        if let Some(ref level) = self.log_level {
            base_config.log_level = level.clone();
        }

        if let Some(ref bridge) = self.bridge_name {
            base_config.bridge_name = bridge.clone();
        }

        if let Some(ref pool_file) = self.pool_file {
            base_config.pool_file = pool_file.clone();
        }

        Ok(base_config)
    }

    /// True when the invocation is an operator command rather than CNI
    pub fn is_operator_command(&self) -> bool {
        self.init_pool.is_some() || self.validate_config || self.print_default_config
    }
}

/// Default configuration rendered as a commented TOML document
pub fn default_config_toml() -> String {
    let default_config = PluginConfig::default();
    let quoted = |items: &[String]| {
        items
            .iter()
            .map(|item| format!("\"{}\"", item))
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        r#"# veth-bridge CNI plugin configuration
# This is the default configuration with all available options

# Host bridge every container is attached to
bridge_name = "{bridge}"

# JSON file holding the address pool
pool_file = "{pool_file}"

[dns]
nameservers = [{nameservers}]
search = [{search}]
# domain = "cluster.local"
options = [{options}]

[logging]
# Log level: trace, debug, info, warn, error
level = "{level}"
# Log format: text or json
format = "{format}"
# Append logs to a file instead of stderr
# file = "/var/log/veth-bridge.log"
"#,
        bridge = default_config.bridge_name,
        pool_file = default_config.pool_file.display(),
        nameservers = quoted(&default_config.dns.nameservers),
        search = quoted(&default_config.dns.search),
        options = quoted(&default_config.dns.options),
        level = default_config.log_level,
        format = default_config.log_format,
    )
}

/// Print default configuration in TOML format
pub fn print_default_config() {
    print!("{}", default_config_toml());
}
