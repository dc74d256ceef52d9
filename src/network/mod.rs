//! Network operations module
//!
//! Handles network namespace switching, kernel link operations and the host
//! bridge.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod bridge;
#[cfg(test)]
pub(crate) mod fake;
pub mod link;
pub mod namespace;

pub use bridge::BridgeManager;
pub use link::{LinkConnector, LinkInfo, LinkOps, RtNetlinkConnector, RtNetlinkLinks};
pub use namespace::{KernelNamespaces, NamespaceExecutor, NamespaceSwitcher};

/// Network namespace representation
///
/// Holds the caller supplied path and, for kernel namespaces, an open
/// descriptor that keeps the namespace reachable while we use it.
#[derive(Debug, Clone)]
pub struct NetworkNamespace {
    path: PathBuf,
    fd: Option<Arc<OwnedFd>>,
}

impl NetworkNamespace {
    pub fn new(path: impl Into<PathBuf>, fd: Option<OwnedFd>) -> Self {
        Self {
            path: path.into(),
            fd: fd.map(Arc::new),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_deref().map(|fd| fd.as_fd())
    }
}
