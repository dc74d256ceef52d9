//! CNI invocation envelope
//!
//! Reads the `CNI_*` environment, decodes the optional network
//! configuration on stdin and shapes the JSON documents written to stdout.

use std::fmt;
use std::path::PathBuf;

use crate::error::CniError;

pub mod netconf;
pub mod result;

pub use netconf::NetConf;
pub use result::{Dns, ErrorResult, Interface, IpConfig, Route, SuccessResult, VersionResult};

/// Result format version this plugin emits
pub const CNI_VERSION: &str = "0.3.1";

/// Versions accepted in the network configuration
pub const SUPPORTED_VERSIONS: &[&str] = &["0.3.0", "0.3.1"];

const CNI_COMMAND: &str = "CNI_COMMAND";
const CNI_CONTAINERID: &str = "CNI_CONTAINERID";
const CNI_NETNS: &str = "CNI_NETNS";
const CNI_IFNAME: &str = "CNI_IFNAME";
const CNI_ARGS: &str = "CNI_ARGS";
const CNI_PATH: &str = "CNI_PATH";

/// Requested operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CniCommand {
    Add,
    Del,
    Version,
}

impl std::str::FromStr for CniCommand {
    type Err = CniError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(CniCommand::Add),
            "DEL" => Ok(CniCommand::Del),
            "VERSION" => Ok(CniCommand::Version),
            other => Err(CniError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for CniCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CniCommand::Add => f.write_str("ADD"),
            CniCommand::Del => f.write_str("DEL"),
            CniCommand::Version => f.write_str("VERSION"),
        }
    }
}

/// Parameters of one ADD or DEL invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CniRequest {
    pub container_id: String,
    pub netns: PathBuf,
    pub ifname: String,
    pub extra_args: Option<String>,
    pub plugin_path: Option<String>,
}

/// Parsed invocation environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CniInvocation {
    Add(CniRequest),
    Del(CniRequest),
    Version,
}

impl CniInvocation {
    /// Parse using an arbitrary variable source, normally the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CniError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let command: CniCommand = lookup(CNI_COMMAND)
            .ok_or(CniError::MissingVariable(CNI_COMMAND))?
            .trim()
            .parse()?;

        if command == CniCommand::Version {
            return Ok(CniInvocation::Version);
        }

        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or(CniError::MissingVariable(key))
        };

        let request = CniRequest {
            container_id: required(CNI_CONTAINERID)?,
            netns: PathBuf::from(required(CNI_NETNS)?),
            ifname: required(CNI_IFNAME)?,
            extra_args: lookup(CNI_ARGS).filter(|value| !value.is_empty()),
            plugin_path: lookup(CNI_PATH).filter(|value| !value.is_empty()),
        };

        Ok(match command {
            CniCommand::Add => CniInvocation::Add(request),
            CniCommand::Del => CniInvocation::Del(request),
            CniCommand::Version => CniInvocation::Version,
        })
    }

    pub fn command(&self) -> CniCommand {
        match self {
            CniInvocation::Add(_) => CniCommand::Add,
            CniInvocation::Del(_) => CniCommand::Del,
            CniInvocation::Version => CniCommand::Version,
        }
    }
}

/// Split `CNI_ARGS` (`K1=V1;K2=V2`) into pairs, skipping malformed items
pub fn parse_extra_args(args: &str) -> Vec<(String, String)> {
    args.split(';')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}
