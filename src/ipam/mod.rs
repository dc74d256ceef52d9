//! IPv4 address pool management
//!
//! A pool hands out addresses from one CIDR block per host and reserves a
//! single gateway address inside that block. Backends implement
//! [`AddressPool`]; the provisioner only ever sees the trait object.

use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

use crate::error::IpamError;

pub mod file;
pub mod memory;
pub mod pool;

pub use file::FilePool;
pub use memory::MemoryPool;
pub use pool::{PoolRecord, PoolState};

/// Address pool capability
///
/// Every call is a complete load-mutate-persist cycle for the backend.
/// Returned networks carry the host address in `ip()` and the pool prefix
/// in `prefix()`.
pub trait AddressPool: Send + Sync {
    /// Allocate the lowest free address above the network base
    fn allocate(&self) -> Result<Ipv4Network, IpamError>;

    /// Return an address to the pool; unknown addresses are ignored
    fn deallocate(&self, address: Ipv4Addr) -> Result<(), IpamError>;

    /// The pool gateway, allocated on first use and stable afterwards
    fn gateway(&self) -> Result<Ipv4Network, IpamError>;
}
