//! Kernel link, address and route operations using rtnetlink
//!
//! A netlink socket is bound to the network namespace of the thread that
//! opened it, so callers connect once per namespace: on the host for the
//! bridge and veth pair, and again from inside the namespace executor for
//! the container side.

use futures_util::stream::TryStreamExt;
use ipnetwork::Ipv4Network;
use nix::errno::Errno;
use rtnetlink::packet_route::address::AddressAttribute;
use rtnetlink::packet_route::link::{LinkAttribute, LinkMessage};
use rtnetlink::packet_route::AddressFamily;
use rtnetlink::{new_connection, Handle, LinkBridge, LinkUnspec, LinkVeth, RouteMessageBuilder};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::os::fd::AsRawFd;
use tracing::debug;

use crate::error::NetworkError;
use crate::network::NetworkNamespace;
use crate::routing::RouteEntry;

/// A link as seen from one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub index: u32,
    pub name: String,
    pub mac: Option<String>,
}

/// Link operations within the namespace the handle was opened in
pub trait LinkOps {
    fn find(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<LinkInfo>, NetworkError>> + Send;

    fn add_bridge(&self, name: &str) -> impl Future<Output = Result<(), NetworkError>> + Send;

    /// Create both ends of a veth pair in the current namespace
    fn add_veth(
        &self,
        name: &str,
        peer: &str,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    fn set_controller(
        &self,
        index: u32,
        controller: u32,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    fn set_up(&self, index: u32) -> impl Future<Output = Result<(), NetworkError>> + Send;

    /// Rename a link that is still down
    fn rename(
        &self,
        index: u32,
        name: &str,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    fn move_to_namespace(
        &self,
        index: u32,
        namespace: &NetworkNamespace,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    fn add_address(
        &self,
        index: u32,
        address: Ipv4Network,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    fn ipv4_addresses(
        &self,
        index: u32,
    ) -> impl Future<Output = Result<Vec<Ipv4Network>, NetworkError>> + Send;

    fn add_route(&self, route: &RouteEntry)
        -> impl Future<Output = Result<(), NetworkError>> + Send;

    /// Delete a link; deleting one end of a veth pair removes its peer
    fn delete(&self, index: u32) -> impl Future<Output = Result<(), NetworkError>> + Send;
}

/// Opens [`LinkOps`] handles bound to the calling thread's namespace
pub trait LinkConnector: Send + Sync + 'static {
    type Links: LinkOps;

    fn connect(&self) -> Result<Self::Links, NetworkError>;
}

/// Look up a link that has to exist
pub async fn require_link<L: LinkOps>(links: &L, name: &str) -> Result<LinkInfo, NetworkError> {
    links.find(name).await?.ok_or_else(|| NetworkError::LinkNotFound {
        name: name.to_string(),
    })
}

/// Connector for the real kernel
#[derive(Debug, Default, Clone, Copy)]
pub struct RtNetlinkConnector;

impl LinkConnector for RtNetlinkConnector {
    type Links = RtNetlinkLinks;

    /// Must be called from within a tokio runtime, which drives the socket
    fn connect(&self) -> Result<Self::Links, NetworkError> {
        let (connection, handle, _) =
            new_connection().map_err(|e| NetworkError::link("open netlink socket", e))?;

        // Spawn the connection handler
        tokio::spawn(connection);

        Ok(RtNetlinkLinks { handle })
    }
}

/// Link operations implementation using rtnetlink
pub struct RtNetlinkLinks {
    handle: Handle,
}

impl LinkOps for RtNetlinkLinks {
    async fn find(&self, name: &str) -> Result<Option<LinkInfo>, NetworkError> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();

        match links.try_next().await {
            Ok(Some(message)) => Ok(Some(link_info(&message))),
            Ok(None) => Ok(None),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(NetworkError::link(format!("get link {}", name), e)),
        }
    }

    async fn add_bridge(&self, name: &str) -> Result<(), NetworkError> {
        debug!(bridge = name, "creating bridge");
        self.handle
            .link()
            .add(LinkBridge::new(name).build())
            .execute()
            .await
            .map_err(|e| NetworkError::link(format!("add bridge {}", name), e))
    }

    async fn add_veth(&self, name: &str, peer: &str) -> Result<(), NetworkError> {
        debug!(name, peer, "creating veth pair");
        self.handle
            .link()
            .add(LinkVeth::new(name, peer).build())
            .execute()
            .await
            .map_err(|e| NetworkError::link(format!("add veth {}<->{}", name, peer), e))
    }

    async fn set_controller(&self, index: u32, controller: u32) -> Result<(), NetworkError> {
        self.handle
            .link()
            .set(LinkUnspec::new_with_index(index).controller(controller).build())
            .execute()
            .await
            .map_err(|e| {
                NetworkError::link(format!("attach link #{} to #{}", index, controller), e)
            })
    }

    async fn set_up(&self, index: u32) -> Result<(), NetworkError> {
        self.handle
            .link()
            .set(LinkUnspec::new_with_index(index).up().build())
            .execute()
            .await
            .map_err(|e| NetworkError::link(format!("set link #{} up", index), e))
    }

    async fn rename(&self, index: u32, name: &str) -> Result<(), NetworkError> {
        debug!(index, name, "renaming link");
        self.handle
            .link()
            .set(LinkUnspec::new_with_index(index).name(name.to_string()).build())
            .execute()
            .await
            .map_err(|e| NetworkError::link(format!("rename link #{} to {}", index, name), e))
    }

    async fn move_to_namespace(
        &self,
        index: u32,
        namespace: &NetworkNamespace,
    ) -> Result<(), NetworkError> {
        let fd = namespace
            .fd()
            .map(|fd| fd.as_raw_fd())
            .ok_or_else(|| NetworkError::NamespaceResolution {
                path: namespace.path().to_path_buf(),
                reason: "namespace handle has no open descriptor".to_string(),
            })?;
        let operation = format!("move link #{} to {}", index, namespace.path().display());

        self.handle
            .link()
            .set(LinkUnspec::new_with_index(index).setns_by_fd(fd).build())
            .execute()
            .await
            .map_err(|e| NetworkError::link(operation, e))
    }

    async fn add_address(&self, index: u32, address: Ipv4Network) -> Result<(), NetworkError> {
        debug!(index, %address, "adding address");
        self.handle
            .address()
            .add(index, IpAddr::V4(address.ip()), address.prefix())
            .execute()
            .await
            .map_err(|e| NetworkError::link(format!("add address {} to #{}", address, index), e))
    }

    async fn ipv4_addresses(&self, index: u32) -> Result<Vec<Ipv4Network>, NetworkError> {
        let mut messages = self
            .handle
            .address()
            .get()
            .set_link_index_filter(index)
            .execute();

        let mut addresses = Vec::new();
        while let Some(message) = messages
            .try_next()
            .await
            .map_err(|e| NetworkError::link(format!("list addresses of #{}", index), e))?
        {
            if message.header.family != AddressFamily::Inet {
                continue;
            }
            for attribute in &message.attributes {
                if let AddressAttribute::Address(IpAddr::V4(ip)) = attribute {
                    let address = Ipv4Network::new(*ip, message.header.prefix_len)
                        .map_err(|e| NetworkError::link("decode address", e))?;
                    if !addresses.contains(&address) {
                        addresses.push(address);
                    }
                }
            }
        }
        Ok(addresses)
    }

    async fn add_route(&self, route: &RouteEntry) -> Result<(), NetworkError> {
        debug!(%route, "adding route");
        let mut builder = RouteMessageBuilder::<Ipv4Addr>::new()
            .destination_prefix(route.destination.network(), route.destination.prefix())
            .gateway(route.gateway);
        if let Some(index) = route.interface {
            builder = builder.output_interface(index);
        }

        self.handle
            .route()
            .add(builder.build())
            .execute()
            .await
            .map_err(|e| NetworkError::link(format!("add route {}", route), e))
    }

    async fn delete(&self, index: u32) -> Result<(), NetworkError> {
        debug!(index, "deleting link");
        self.handle
            .link()
            .del(index)
            .execute()
            .await
            .map_err(|e| NetworkError::link(format!("delete link #{}", index), e))
    }
}

fn link_info(message: &LinkMessage) -> LinkInfo {
    let mut info = LinkInfo {
        index: message.header.index,
        name: String::new(),
        mac: None,
    };
    for attribute in &message.attributes {
        match attribute {
            LinkAttribute::IfName(name) => info.name = name.clone(),
            LinkAttribute::Address(bytes) => info.mac = Some(format_mac(bytes)),
            _ => {}
        }
    }
    info
}

fn is_not_found(err: &rtnetlink::Error) -> bool {
    matches!(
        err,
        rtnetlink::Error::NetlinkError(message)
            if message.code.map(|code| code.get()) == Some(-(Errno::ENODEV as i32))
    )
}

/// Colon separated lowercase hex, the form CNI results carry
pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
