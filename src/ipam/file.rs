//! File-backed address pool
//!
//! The pool lives in one JSON file per host. Each operation takes an
//! exclusive `flock` on a sidecar `<pool>.lock` file for the whole
//! load-mutate-persist cycle, which serializes concurrent plugin processes
//! as well as threads holding independent `FilePool` handles. The pool file
//! itself is replaced by rename so readers never observe a partial write.

use ipnetwork::Ipv4Network;
use nix::fcntl::{Flock, FlockArg};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::IpamError;
use crate::ipam::pool::{PoolRecord, PoolState};
use crate::ipam::AddressPool;

/// Address pool persisted in a JSON file
#[derive(Debug, Clone)]
pub struct FilePool {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FilePool {
    /// Handle for an existing pool file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = sibling(&path, ".lock");
        Self { path, lock_path }
    }

    /// Create a fresh pool file for `cidr`, refusing to overwrite one
    pub fn initialize(path: impl Into<PathBuf>, cidr: Ipv4Network) -> Result<Self, IpamError> {
        let pool = Self::new(path);
        if let Some(parent) = pool.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| pool.io(e))?;
        }

        let _lock = pool.lock()?;
        if pool.path.exists() {
            return Err(IpamError::AlreadyInitialized {
                path: pool.path.clone(),
            });
        }
        let state = PoolState::new(cidr);
        pool.store(&state)?;
        info!(path = %pool.path.display(), cidr = %state.cidr(), "initialized address pool");
        Ok(pool)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current pool contents, read under the lock
    pub fn snapshot(&self) -> Result<PoolState, IpamError> {
        let _lock = self.lock()?;
        self.load()
    }

    /// Run one locked load-mutate-persist cycle. The closure reports
    /// whether it changed the state; unchanged state is not rewritten.
    fn transaction<T, F>(&self, mutate: F) -> Result<T, IpamError>
    where
        F: FnOnce(&mut PoolState) -> Result<(T, bool), IpamError>,
    {
        let _lock = self.lock()?;
        let mut state = self.load()?;
        let (value, changed) = mutate(&mut state)?;
        if changed {
            self.store(&state)?;
        }
        Ok(value)
    }

    fn lock(&self) -> Result<Flock<File>, IpamError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| IpamError::Io {
                path: self.lock_path.clone(),
                source: e,
            })?;

        Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| IpamError::Lock {
            path: self.lock_path.clone(),
            reason: errno.to_string(),
        })
    }

    fn load(&self) -> Result<PoolState, IpamError> {
        let content = fs::read_to_string(&self.path).map_err(|e| self.io(e))?;
        let record: PoolRecord =
            serde_json::from_str(&content).map_err(|e| IpamError::Malformed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        PoolState::from_record(&record, &self.path)
    }

    fn store(&self, state: &PoolState) -> Result<(), IpamError> {
        let content =
            serde_json::to_vec(&state.to_record()).map_err(|e| IpamError::Malformed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let staging = sibling(&self.path, ".tmp");
        let mut file = File::create(&staging).map_err(|e| self.io(e))?;
        file.write_all(&content).map_err(|e| self.io(e))?;
        file.sync_all().map_err(|e| self.io(e))?;
        fs::rename(&staging, &self.path).map_err(|e| self.io(e))?;
        debug!(path = %self.path.display(), allocated = state.allocated().len(), "persisted address pool");
        Ok(())
    }

    fn io(&self, source: std::io::Error) -> IpamError {
        IpamError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl AddressPool for FilePool {
    fn allocate(&self) -> Result<Ipv4Network, IpamError> {
        self.transaction(|state| Ok((state.allocate()?, true)))
    }

    fn deallocate(&self, address: Ipv4Addr) -> Result<(), IpamError> {
        self.transaction(|state| Ok(((), state.release(address))))
    }

    fn gateway(&self) -> Result<Ipv4Network, IpamError> {
        self.transaction(|state| state.gateway())
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// True when the error means the pool file has not been provisioned
pub fn is_missing(err: &IpamError) -> bool {
    matches!(err, IpamError::Io { source, .. } if source.kind() == ErrorKind::NotFound)
}
