//! In-memory address pool

use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

use crate::error::IpamError;
use crate::ipam::pool::PoolState;
use crate::ipam::AddressPool;

/// Address pool that lives only as long as the process
#[derive(Debug)]
pub struct MemoryPool {
    state: Mutex<PoolState>,
}

impl MemoryPool {
    pub fn new(cidr: Ipv4Network) -> Self {
        Self::from_state(PoolState::new(cidr))
    }

    pub fn from_state(state: PoolState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> PoolState {
        self.state().clone()
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        // pool mutations never panic midway, so poisoned state is still valid
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AddressPool for MemoryPool {
    fn allocate(&self) -> Result<Ipv4Network, IpamError> {
        self.state().allocate()
    }

    fn deallocate(&self, address: Ipv4Addr) -> Result<(), IpamError> {
        self.state().release(address);
        Ok(())
    }

    fn gateway(&self) -> Result<Ipv4Network, IpamError> {
        self.state().gateway().map(|(gateway, _)| gateway)
    }
}
