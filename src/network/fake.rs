//! In-process stand-in for the kernel network stack used by tests
//!
//! Tracks namespaces, links, addresses and routes, and a per-thread
//! "current namespace" so namespace switching and netlink handles behave
//! like their kernel counterparts.

use ipnetwork::Ipv4Network;
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{NetworkError, SwitchPhase};
use crate::network::link::{format_mac, LinkConnector, LinkInfo, LinkOps};
use crate::network::namespace::NamespaceSwitcher;
use crate::network::NetworkNamespace;
use crate::routing::RouteEntry;

pub const HOST_NAMESPACE: &str = "host";

thread_local! {
    static CURRENT: RefCell<PathBuf> = RefCell::new(PathBuf::from(HOST_NAMESPACE));
}

/// Namespace the calling thread is currently in
pub fn current_namespace() -> PathBuf {
    CURRENT.with(|current| current.borrow().clone())
}

fn set_current_namespace(path: &Path) {
    CURRENT.with(|current| *current.borrow_mut() = path.to_path_buf());
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Bridge,
    Veth { peer: u32 },
}

#[derive(Debug, Clone)]
pub struct FakeLink {
    pub index: u32,
    pub name: String,
    pub namespace: PathBuf,
    pub kind: LinkKind,
    pub up: bool,
    pub controller: Option<u32>,
    pub addresses: Vec<Ipv4Network>,
}

#[derive(Debug)]
struct KernelState {
    next_index: u32,
    namespaces: HashSet<PathBuf>,
    links: Vec<FakeLink>,
    routes: Vec<(PathBuf, RouteEntry)>,
    fail_enter: bool,
    fail_restore: bool,
    failing_operations: HashSet<&'static str>,
    hidden: HashSet<String>,
}

/// Shared fake kernel; clones observe the same state
#[derive(Debug, Clone)]
pub struct FakeKernel {
    state: Arc<Mutex<KernelState>>,
}

impl FakeKernel {
    pub fn new() -> Self {
        let mut namespaces = HashSet::new();
        namespaces.insert(PathBuf::from(HOST_NAMESPACE));
        Self {
            state: Arc::new(Mutex::new(KernelState {
                next_index: 2,
                namespaces,
                links: Vec::new(),
                routes: Vec::new(),
                fail_enter: false,
                fail_restore: false,
                failing_operations: HashSet::new(),
                hidden: HashSet::new(),
            })),
        }
    }

    pub fn add_namespace(&self, path: impl Into<PathBuf>) {
        self.lock().namespaces.insert(path.into());
    }

    pub fn fail_enter(&self, fail: bool) {
        self.lock().fail_enter = fail;
    }

    pub fn fail_restore(&self, fail: bool) {
        self.lock().fail_restore = fail;
    }

    /// Make every call of the named [`LinkOps`] method fail
    pub fn fail_operation(&self, operation: &'static str) {
        self.lock().failing_operations.insert(operation);
    }

    /// Make the next lookup of `name` miss, as if it raced a creation
    pub fn hide_once(&self, name: &str) {
        self.lock().hidden.insert(name.to_string());
    }

    pub fn link(&self, namespace: impl AsRef<Path>, name: &str) -> Option<FakeLink> {
        let namespace = namespace.as_ref();
        self.lock()
            .links
            .iter()
            .find(|l| l.namespace == namespace && l.name == name)
            .cloned()
    }

    pub fn links_in(&self, namespace: impl AsRef<Path>) -> Vec<FakeLink> {
        let namespace = namespace.as_ref();
        self.lock()
            .links
            .iter()
            .filter(|l| l.namespace == namespace)
            .cloned()
            .collect()
    }

    pub fn routes_in(&self, namespace: impl AsRef<Path>) -> Vec<RouteEntry> {
        let namespace = namespace.as_ref();
        self.lock()
            .routes
            .iter()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, route)| route.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl NamespaceSwitcher for FakeKernel {
    type Saved = PathBuf;

    fn resolve(&self, path: &Path) -> Result<NetworkNamespace, NetworkError> {
        if !self.lock().namespaces.contains(path) {
            return Err(NetworkError::NamespaceResolution {
                path: path.to_path_buf(),
                reason: "No such file or directory".to_string(),
            });
        }
        Ok(NetworkNamespace::new(path, None))
    }

    fn capture(&self) -> Result<PathBuf, NetworkError> {
        Ok(current_namespace())
    }

    fn enter(&self, target: &NetworkNamespace) -> Result<(), NetworkError> {
        if self.lock().fail_enter {
            return Err(NetworkError::NamespaceSwitch {
                phase: SwitchPhase::Enter,
                reason: "EPERM".to_string(),
            });
        }
        set_current_namespace(target.path());
        Ok(())
    }

    fn restore(&self, original: PathBuf) -> Result<(), NetworkError> {
        if self.lock().fail_restore {
            return Err(NetworkError::NamespaceSwitch {
                phase: SwitchPhase::Restore,
                reason: "EINVAL".to_string(),
            });
        }
        set_current_namespace(&original);
        Ok(())
    }
}

impl LinkConnector for FakeKernel {
    type Links = FakeLinks;

    fn connect(&self) -> Result<FakeLinks, NetworkError> {
        Ok(FakeLinks {
            namespace: current_namespace(),
            kernel: self.clone(),
        })
    }
}

/// Link handle bound to the namespace that was current when it was opened
pub struct FakeLinks {
    namespace: PathBuf,
    kernel: FakeKernel,
}

impl FakeLinks {
    fn state(&self, operation: &'static str) -> Result<MutexGuard<'_, KernelState>, NetworkError> {
        let state = self.kernel.lock();
        if state.failing_operations.contains(operation) {
            return Err(NetworkError::link(operation, "injected failure"));
        }
        Ok(state)
    }

    fn position(
        &self,
        state: &KernelState,
        operation: &str,
        index: u32,
    ) -> Result<usize, NetworkError> {
        state
            .links
            .iter()
            .position(|l| l.index == index && l.namespace == self.namespace)
            .ok_or_else(|| NetworkError::link(operation, "No such device"))
    }

    fn create(&self, state: &mut KernelState, operation: &str, name: &str, kind: LinkKind) -> Result<u32, NetworkError> {
        if state
            .links
            .iter()
            .any(|l| l.namespace == self.namespace && l.name == name)
        {
            return Err(NetworkError::link(operation, "File exists"));
        }
        let index = state.next_index;
        state.next_index += 1;
        state.links.push(FakeLink {
            index,
            name: name.to_string(),
            namespace: self.namespace.clone(),
            kind,
            up: false,
            controller: None,
            addresses: Vec::new(),
        });
        Ok(index)
    }
}

impl LinkOps for FakeLinks {
    async fn find(&self, name: &str) -> Result<Option<LinkInfo>, NetworkError> {
        let mut state = self.state("find")?;
        if state.hidden.remove(name) {
            return Ok(None);
        }
        Ok(state
            .links
            .iter()
            .find(|l| l.namespace == self.namespace && l.name == name)
            .map(|l| LinkInfo {
                index: l.index,
                name: l.name.clone(),
                mac: Some(format_mac(&[0x02, 0, 0, 0, 0, l.index as u8])),
            }))
    }

    async fn add_bridge(&self, name: &str) -> Result<(), NetworkError> {
        let mut state = self.state("add_bridge")?;
        self.create(&mut state, "add_bridge", name, LinkKind::Bridge)?;
        Ok(())
    }

    async fn add_veth(&self, name: &str, peer: &str) -> Result<(), NetworkError> {
        let mut state = self.state("add_veth")?;
        if name == peer {
            return Err(NetworkError::link("add_veth", "File exists"));
        }
        let first = state.next_index;
        self.create(&mut state, "add_veth", name, LinkKind::Veth { peer: first + 1 })?;
        self.create(&mut state, "add_veth", peer, LinkKind::Veth { peer: first })
            .inspect_err(|_| {
                state.links.retain(|l| l.index != first);
            })?;
        Ok(())
    }

    async fn set_controller(&self, index: u32, controller: u32) -> Result<(), NetworkError> {
        let mut state = self.state("set_controller")?;
        let bridge = self.position(&state, "set_controller", controller)?;
        if state.links[bridge].kind != LinkKind::Bridge {
            return Err(NetworkError::link("set_controller", "Operation not supported"));
        }
        let link = self.position(&state, "set_controller", index)?;
        state.links[link].controller = Some(controller);
        Ok(())
    }

    async fn set_up(&self, index: u32) -> Result<(), NetworkError> {
        let mut state = self.state("set_up")?;
        let link = self.position(&state, "set_up", index)?;
        state.links[link].up = true;
        Ok(())
    }

    async fn rename(&self, index: u32, name: &str) -> Result<(), NetworkError> {
        let mut state = self.state("rename")?;
        let link = self.position(&state, "rename", index)?;
        if state.links[link].up {
            return Err(NetworkError::link("rename", "Device or resource busy"));
        }
        if state
            .links
            .iter()
            .any(|l| l.namespace == self.namespace && l.name == name)
        {
            return Err(NetworkError::link("rename", "File exists"));
        }
        state.links[link].name = name.to_string();
        Ok(())
    }

    async fn move_to_namespace(
        &self,
        index: u32,
        namespace: &NetworkNamespace,
    ) -> Result<(), NetworkError> {
        let mut state = self.state("move_to_namespace")?;
        let link = self.position(&state, "move_to_namespace", index)?;
        let target = namespace.path().to_path_buf();
        if !state.namespaces.contains(&target) {
            return Err(NetworkError::link("move_to_namespace", "Invalid argument"));
        }
        let name = state.links[link].name.clone();
        if state
            .links
            .iter()
            .any(|l| l.namespace == target && l.name == name)
        {
            return Err(NetworkError::link("move_to_namespace", "File exists"));
        }
        let moved = &mut state.links[link];
        moved.namespace = target;
        moved.up = false;
        moved.controller = None;
        Ok(())
    }

    async fn add_address(&self, index: u32, address: Ipv4Network) -> Result<(), NetworkError> {
        let mut state = self.state("add_address")?;
        let link = self.position(&state, "add_address", index)?;
        if state.links[link].addresses.contains(&address) {
            return Err(NetworkError::link("add_address", "File exists"));
        }
        state.links[link].addresses.push(address);
        Ok(())
    }

    async fn ipv4_addresses(&self, index: u32) -> Result<Vec<Ipv4Network>, NetworkError> {
        let state = self.state("ipv4_addresses")?;
        let link = self.position(&state, "ipv4_addresses", index)?;
        Ok(state.links[link].addresses.clone())
    }

    async fn add_route(&self, route: &RouteEntry) -> Result<(), NetworkError> {
        let mut state = self.state("add_route")?;
        let reachable = state.links.iter().any(|l| {
            l.namespace == self.namespace
                && l.up
                && l.addresses.iter().any(|a| {
                    Ipv4Network::new(a.network(), a.prefix())
                        .map(|net| net.contains(route.gateway))
                        .unwrap_or(false)
                })
        });
        if !reachable {
            return Err(NetworkError::link("add_route", "Network is unreachable"));
        }
        state.routes.push((self.namespace.clone(), route.clone()));
        Ok(())
    }

    async fn delete(&self, index: u32) -> Result<(), NetworkError> {
        let mut state = self.state("delete")?;
        let link = self.position(&state, "delete", index)?;
        let removed = state.links.remove(link);
        if let LinkKind::Veth { peer } = removed.kind {
            state.links.retain(|l| l.index != peer);
        }
        let namespace = self.namespace.clone();
        state
            .routes
            .retain(|(ns, route)| !(ns == &namespace && route.interface == Some(index)));
        Ok(())
    }
}
