//! veth-bridge CNI plugin
//!
//! This library provides the components of a CNI plugin that connects a
//! container network namespace to a host bridge through a veth pair and
//! assigns the container an IPv4 address from a file-backed pool.

pub mod cni;
pub mod config;
pub mod error;
pub mod ipam;
pub mod logging;
pub mod network;
pub mod plugin;
pub mod provisioner;
pub mod routing;

pub use error::AppError;
pub use provisioner::InterfaceProvisioner;
