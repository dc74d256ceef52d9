//! ADD and DEL pipelines
//!
//! Wires a container namespace to the host bridge through a veth pair and
//! gives the container end an address from the pool. Every step fails fast
//! and nothing already created is rolled back.

use ipnetwork::Ipv4Network;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cni::{CniRequest, Interface, IpConfig, Route, SuccessResult};
use crate::config::MAX_INTERFACE_NAME;
use crate::error::{AppError, NetworkError, ProvisionStep, StepContext};
use crate::ipam::AddressPool;
use crate::network::link::require_link;
use crate::network::{
    BridgeManager, LinkConnector, LinkInfo, LinkOps, NamespaceExecutor, NamespaceSwitcher,
};
use crate::routing::RouteCalculator;

/// Characters of the container id used for the host side interface
pub const HOST_NAME_LEN: usize = 8;

/// Host side name derived from the container id
pub fn host_interface_name(container_id: &str) -> Result<String, NetworkError> {
    if container_id.is_empty() {
        return Err(NetworkError::InvalidInterfaceName {
            name: String::new(),
            reason: "container id is empty".to_string(),
        });
    }
    let name: String = container_id.chars().take(HOST_NAME_LEN).collect();
    validate_interface_name(&name)?;
    Ok(name)
}

/// Kernel rules for link names
pub fn validate_interface_name(name: &str) -> Result<(), NetworkError> {
    let invalid = |reason: &str| NetworkError::InvalidInterfaceName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_INTERFACE_NAME {
        return Err(invalid("name is longer than 15 bytes"));
    }
    if name == "." || name == ".." {
        return Err(invalid("name is reserved"));
    }
    if name
        .chars()
        .any(|c| c == '/' || c == '\0' || c.is_whitespace())
    {
        return Err(invalid("name contains '/', whitespace or NUL"));
    }
    Ok(())
}

/// Name the container end carries until it is inside its namespace
fn staging_name(host_name: &str) -> String {
    format!("c{}", host_name)
}

/// Runs ADD and DEL against a namespace switcher and link connector
pub struct InterfaceProvisioner<N, C> {
    connector: Arc<C>,
    pool: Arc<dyn AddressPool>,
    bridge: BridgeManager,
    executor: NamespaceExecutor<N>,
    routes: RouteCalculator,
}

impl<N, C> InterfaceProvisioner<N, C>
where
    N: NamespaceSwitcher,
    C: LinkConnector,
{
    pub fn new(
        switcher: Arc<N>,
        connector: Arc<C>,
        pool: Arc<dyn AddressPool>,
        bridge: BridgeManager,
    ) -> Self {
        Self {
            connector,
            pool,
            bridge,
            executor: NamespaceExecutor::new(switcher),
            routes: RouteCalculator::new(),
        }
    }

    /// Connect a container namespace to the bridge
    pub async fn add(&self, request: &CniRequest) -> Result<SuccessResult, AppError> {
        let host = self.connector.connect().step(ProvisionStep::EnsureBridge)?;
        let bridge = self
            .bridge
            .ensure(&host, self.pool.as_ref())
            .await
            .step(ProvisionStep::EnsureBridge)?;

        let namespace = self
            .executor
            .resolve(&request.netns)
            .step(ProvisionStep::ResolveNamespace)?;

        let host_name =
            host_interface_name(&request.container_id).step(ProvisionStep::CreateVeth)?;
        validate_interface_name(&request.ifname).step(ProvisionStep::CreateVeth)?;
        let staging = staging_name(&host_name);
        for name in [&host_name, &staging] {
            if host.find(name).await.step(ProvisionStep::CreateVeth)?.is_some() {
                return Err(NetworkError::link(
                    format!("add veth {}", host_name),
                    format!("{} already exists on the host", name),
                ))
                .step(ProvisionStep::CreateVeth);
            }
        }
        host.add_veth(&host_name, &staging)
            .await
            .step(ProvisionStep::CreateVeth)?;
        let host_link = require_link(&host, &host_name)
            .await
            .step(ProvisionStep::CreateVeth)?;
        let container_link = require_link(&host, &staging)
            .await
            .step(ProvisionStep::CreateVeth)?;
        info!(host = %host_name, peer = %staging, "veth pair created");

        host.set_controller(host_link.index, bridge.index)
            .await
            .step(ProvisionStep::AttachHostInterface)?;
        host.set_up(host_link.index)
            .await
            .step(ProvisionStep::AttachHostInterface)?;
        debug!(host = %host_name, bridge = %self.bridge.name(), "host interface attached");

        host.move_to_namespace(container_link.index, &namespace)
            .await
            .step(ProvisionStep::MoveToNamespace)?;
        debug!(peer = %staging, namespace = %namespace.path().display(), "peer moved");

        let connector = Arc::clone(&self.connector);
        let pool = Arc::clone(&self.pool);
        let routes = self.routes;
        let ifname = request.ifname.clone();
        let (container, address, gateway) = self
            .executor
            .execute(&namespace, move || async move {
                let links = connector.connect()?;
                let link = require_link(&links, &staging).await?;
                links.rename(link.index, &ifname).await?;
                links.set_up(link.index).await?;

                let address = pool.allocate()?;
                links.add_address(link.index, address).await?;
                let gateway = pool.gateway()?;
                let route = routes.default_route(gateway.ip(), address, Some(link.index))?;
                links.add_route(&route).await?;

                let container = require_link(&links, &ifname).await?;
                Ok::<_, AppError>((container, address, gateway))
            })
            .await
            .step(ProvisionStep::ConfigureContainerInterface)?;

        info!(
            container_id = %request.container_id,
            interface = %request.ifname,
            %address,
            gateway = %gateway.ip(),
            "container interface configured"
        );
        Ok(add_result(request, &host_link, &container, address, gateway))
    }

    /// Release the container interface and its addresses
    pub async fn del(&self, request: &CniRequest) -> Result<SuccessResult, AppError> {
        let namespace = self
            .executor
            .resolve(&request.netns)
            .step(ProvisionStep::ResolveNamespace)?;

        let connector = Arc::clone(&self.connector);
        let pool = Arc::clone(&self.pool);
        let ifname = request.ifname.clone();
        let freed = self
            .executor
            .execute(&namespace, move || async move {
                let links = connector.connect()?;
                let Some(link) = links.find(&ifname).await? else {
                    warn!(interface = %ifname, "container interface already gone, nothing to release");
                    return Ok(Vec::new());
                };

                let addresses = links.ipv4_addresses(link.index).await?;
                for address in &addresses {
                    pool.deallocate(address.ip())?;
                }
                links.delete(link.index).await?;
                Ok::<_, AppError>(addresses)
            })
            .await
            .step(ProvisionStep::ReleaseContainerInterface)?;

        info!(
            container_id = %request.container_id,
            interface = %request.ifname,
            released = freed.len(),
            "container interface removed"
        );
        Ok(del_result(request, &freed))
    }
}

fn add_result(
    request: &CniRequest,
    host: &LinkInfo,
    container: &LinkInfo,
    address: Ipv4Network,
    gateway: Ipv4Network,
) -> SuccessResult {
    let gateway = gateway.ip().to_string();
    SuccessResult {
        interfaces: vec![
            Interface {
                name: host.name.clone(),
                mac: host.mac.clone(),
                sandbox: None,
            },
            Interface {
                name: container.name.clone(),
                mac: container.mac.clone(),
                sandbox: Some(request.netns.display().to_string()),
            },
        ],
        ips: vec![IpConfig {
            version: "4".to_string(),
            address: address.to_string(),
            gateway: Some(gateway.clone()),
            interface: Some(1),
        }],
        routes: vec![Route {
            dst: "0.0.0.0/0".to_string(),
            gw: Some(gateway),
        }],
        ..Default::default()
    }
}

fn del_result(request: &CniRequest, freed: &[Ipv4Network]) -> SuccessResult {
    SuccessResult {
        interfaces: vec![Interface {
            name: request.ifname.clone(),
            mac: None,
            sandbox: Some(request.netns.display().to_string()),
        }],
        ips: freed
            .iter()
            .map(|address| IpConfig {
                version: "4".to_string(),
                address: address.to_string(),
                gateway: None,
                interface: Some(0),
            })
            .collect(),
        ..Default::default()
    }
}
