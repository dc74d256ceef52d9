//! Routing table entries installed inside container namespaces

use ipnetwork::Ipv4Network;
use std::fmt;
use std::net::Ipv4Addr;

pub mod rules;

pub use rules::RouteCalculator;

/// Route entry structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: Ipv4Network,
    pub gateway: Ipv4Addr,
    pub interface: Option<u32>,
}

impl RouteEntry {
    pub fn is_default(&self) -> bool {
        self.destination.prefix() == 0
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.destination, self.gateway)?;
        if let Some(index) = self.interface {
            write!(f, " dev #{}", index)?;
        }
        Ok(())
    }
}
