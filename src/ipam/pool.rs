//! Pool state and its on-disk record

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::debug;

use crate::error::IpamError;

/// Serialized pool layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRecord {
    #[serde(rename = "CIDR")]
    pub cidr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(rename = "AllocatedIps", default)]
    pub allocated: Vec<String>,
}

/// Validated, typed view of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolState {
    cidr: Ipv4Network,
    gateway: Option<Ipv4Addr>,
    allocated: Vec<Ipv4Addr>,
}

impl PoolState {
    /// Empty pool covering the network of `cidr`
    pub fn new(cidr: Ipv4Network) -> Self {
        // Normalise host bits away so the walk always starts at the base
        let network = Ipv4Network::new(cidr.network(), cidr.prefix()).unwrap_or(cidr);
        Self {
            cidr: network,
            gateway: None,
            allocated: Vec::new(),
        }
    }

    pub fn cidr(&self) -> Ipv4Network {
        self.cidr
    }

    pub fn gateway_address(&self) -> Option<Ipv4Addr> {
        self.gateway
    }

    pub fn allocated(&self) -> &[Ipv4Addr] {
        &self.allocated
    }

    /// Address paired with the pool prefix
    fn with_prefix(&self, address: Ipv4Addr) -> Ipv4Network {
        // prefix comes from a valid network, so this cannot fail
        Ipv4Network::new(address, self.cidr.prefix()).unwrap_or(self.cidr)
    }

    /// Claim the first free address strictly after the network base
    pub fn allocate(&mut self) -> Result<Ipv4Network, IpamError> {
        let mut candidate = u32::from(self.cidr.network());
        loop {
            candidate = candidate.checked_add(1).ok_or_else(|| self.exhausted())?;
            let address = Ipv4Addr::from(candidate);
            if !self.cidr.contains(address) {
                return Err(self.exhausted());
            }
            if !self.allocated.contains(&address) {
                self.allocated.push(address);
                debug!(%address, cidr = %self.cidr, "allocated address");
                return Ok(self.with_prefix(address));
            }
        }
    }

    /// Drop the first occurrence of `address`, reporting whether it was present
    pub fn release(&mut self, address: Ipv4Addr) -> bool {
        match self.allocated.iter().position(|a| *a == address) {
            Some(index) => {
                self.allocated.remove(index);
                debug!(%address, cidr = %self.cidr, "released address");
                true
            }
            None => {
                debug!(%address, cidr = %self.cidr, "address not allocated, nothing to release");
                false
            }
        }
    }

    /// Existing gateway, or a freshly allocated one that becomes the gateway.
    /// The boolean is true when the state changed.
    pub fn gateway(&mut self) -> Result<(Ipv4Network, bool), IpamError> {
        if let Some(gateway) = self.gateway {
            return Ok((self.with_prefix(gateway), false));
        }
        let gateway = self.allocate()?;
        self.gateway = Some(gateway.ip());
        debug!(gateway = %gateway.ip(), cidr = %self.cidr, "assigned pool gateway");
        Ok((gateway, true))
    }

    fn exhausted(&self) -> IpamError {
        IpamError::Exhausted {
            cidr: self.cidr.to_string(),
        }
    }

    /// Parse and validate a record; `origin` names the source in errors
    pub fn from_record(record: &PoolRecord, origin: &std::path::Path) -> Result<Self, IpamError> {
        let malformed = |reason: String| IpamError::Malformed {
            path: origin.to_path_buf(),
            reason,
        };

        let cidr: Ipv4Network = record
            .cidr
            .trim()
            .parse()
            .map_err(|e| malformed(format!("invalid CIDR '{}': {}", record.cidr, e)))?;
        let mut state = PoolState::new(cidr);

        for entry in &record.allocated {
            let address: Ipv4Addr = entry
                .parse()
                .map_err(|e| malformed(format!("invalid address '{}': {}", entry, e)))?;
            if !state.cidr.contains(address) {
                return Err(malformed(format!(
                    "address {} is outside {}",
                    address, state.cidr
                )));
            }
            if state.allocated.contains(&address) {
                return Err(malformed(format!("address {} is listed twice", address)));
            }
            state.allocated.push(address);
        }

        if let Some(gateway) = record.gateway.as_deref().filter(|g| !g.trim().is_empty()) {
            let address: Ipv4Addr = gateway
                .trim()
                .parse()
                .map_err(|e| malformed(format!("invalid gateway '{}': {}", gateway, e)))?;
            if !state.cidr.contains(address) {
                return Err(malformed(format!(
                    "gateway {} is outside {}",
                    address, state.cidr
                )));
            }
            if !state.allocated.contains(&address) {
                return Err(malformed(format!(
                    "gateway {} is not in the allocated set",
                    address
                )));
            }
            state.gateway = Some(address);
        }

        Ok(state)
    }

    pub fn to_record(&self) -> PoolRecord {
        PoolRecord {
            cidr: self.cidr.to_string(),
            gateway: self.gateway.map(|g| g.to_string()),
            allocated: self.allocated.iter().map(|a| a.to_string()).collect(),
        }
    }
}
