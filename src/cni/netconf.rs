//! Network configuration document passed on stdin

use serde::Deserialize;
use std::path::PathBuf;

use crate::cni::result::Dns;
use crate::cni::SUPPORTED_VERSIONS;
use crate::error::CniError;

/// Network configuration as written by the container runtime
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetConf {
    #[serde(default)]
    pub cni_version: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub plugin_type: Option<String>,
    #[serde(default)]
    pub bridge: Option<String>,
    #[serde(default)]
    pub ipam: Option<IpamConf>,
    #[serde(default)]
    pub dns: Option<Dns>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpamConf {
    #[serde(default)]
    pub data_file: Option<PathBuf>,
}

impl NetConf {
    /// Decode stdin contents; blank input yields an empty configuration
    pub fn parse(input: &str) -> Result<Self, CniError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        let conf: NetConf =
            serde_json::from_str(input).map_err(|e| CniError::Decode(e.to_string()))?;

        if let Some(version) = conf.cni_version.as_deref() {
            if !SUPPORTED_VERSIONS.contains(&version) {
                return Err(CniError::Decode(format!(
                    "unsupported cniVersion {}, expected one of {}",
                    version,
                    SUPPORTED_VERSIONS.join(", ")
                )));
            }
        }
        Ok(conf)
    }
}
