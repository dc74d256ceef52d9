//! Runs ADD and DEL against the real kernel.
//!
//! Needs CAP_NET_ADMIN and CAP_SYS_ADMIN, so it is ignored by default:
//! `sudo -E cargo test --test kernel_roundtrip -- --ignored`

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use netns_rs::NetNs;
use tempfile::TempDir;
use veth_bridge_cni::cni::CniRequest;
use veth_bridge_cni::ipam::{FilePool, PoolState};
use veth_bridge_cni::network::{
    BridgeManager, KernelNamespaces, LinkConnector, LinkOps, RtNetlinkConnector,
};
use veth_bridge_cni::InterfaceProvisioner;

const BRIDGE: &str = "vbrtest0";

#[tokio::test]
#[ignore = "requires root"]
async fn test_add_then_del_against_kernel() {
    let ns = NetNs::new("cnitest").unwrap();
    let dir = TempDir::new().unwrap();
    let pool_path = dir.path().join("pool.json");
    FilePool::initialize(&pool_path, "10.250.7.0/24".parse().unwrap()).unwrap();

    let provisioner = InterfaceProvisioner::new(
        Arc::new(KernelNamespaces),
        Arc::new(RtNetlinkConnector),
        Arc::new(FilePool::new(&pool_path)),
        BridgeManager::new(BRIDGE),
    );
    let request = CniRequest {
        container_id: "abcdef0123456789".to_string(),
        netns: PathBuf::from(ns.path()),
        ifname: "eth0".to_string(),
        extra_args: None,
        plugin_path: None,
    };

    let added = provisioner.add(&request).await;
    let deleted = provisioner.del(&request).await;

    let host = RtNetlinkConnector.connect().unwrap();
    let leftover = host.find("abcdef01").await.unwrap();
    if let Some(bridge) = host.find(BRIDGE).await.unwrap() {
        host.delete(bridge.index).await.unwrap();
    }
    ns.remove().unwrap();

    let added = added.unwrap();
    assert_eq!(added.interfaces[0].name, "abcdef01");
    assert_eq!(added.interfaces[1].name, "eth0");
    assert_eq!(added.ips[0].address, "10.250.7.2/24");
    assert_eq!(added.routes[0].gw.as_deref(), Some("10.250.7.1"));

    let deleted = deleted.unwrap();
    assert_eq!(deleted.ips.len(), 1);
    assert!(leftover.is_none());

    let state: PoolState = FilePool::new(&pool_path).snapshot().unwrap();
    assert_eq!(state.allocated(), &[Ipv4Addr::new(10, 250, 7, 1)]);
}
