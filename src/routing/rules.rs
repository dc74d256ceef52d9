//! Route calculation and validation

use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

use crate::error::RouteError;
use crate::routing::RouteEntry;

/// Builds the routes a container interface needs
#[derive(Debug, Default, Clone, Copy)]
pub struct RouteCalculator;

impl RouteCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Default route through `gateway`, checked against the interface subnet
    pub fn default_route(
        &self,
        gateway: Ipv4Addr,
        subnet: Ipv4Network,
        interface: Option<u32>,
    ) -> Result<RouteEntry, RouteError> {
        let route = RouteEntry {
            destination: Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0)
                .map_err(|e| RouteError::InvalidRoute(e.to_string()))?,
            gateway,
            interface,
        };
        self.validate_route(&route, subnet)?;
        Ok(route)
    }

    /// The gateway has to be on-link for the kernel to accept the route
    pub fn validate_route(&self, route: &RouteEntry, subnet: Ipv4Network) -> Result<(), RouteError> {
        if route.gateway.is_unspecified() || route.gateway.is_broadcast() {
            return Err(RouteError::InvalidRoute(format!(
                "gateway {} is not a usable address",
                route.gateway
            )));
        }
        let on_link = Ipv4Network::new(subnet.network(), subnet.prefix())
            .map(|net| net.contains(route.gateway))
            .unwrap_or(false);
        if !on_link {
            return Err(RouteError::InvalidRoute(format!(
                "gateway {} is not reachable from {}",
                route.gateway, subnet
            )));
        }
        Ok(())
    }
}
