//! Interface discovery inside a network namespace

use std::collections::BTreeMap;

use nix::ifaddrs::getifaddrs;
use nix::net::if_::if_nameindex;
use tclens::{AttachError, LinkInfo, NetDevice, TcLensError};
use tracing::debug;

use crate::netns::NetnsHandle;

/// An interface as seen by `getifaddrs` in the current namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub ifindex: u32,
    pub name: String,
    pub hardware_addr: Vec<u8>,
}

/// List the interfaces of the calling thread's namespace, ordered by ifindex
pub fn list_interfaces() -> Result<Vec<Interface>, TcLensError> {
    let addrs = getifaddrs()
        .map_err(|e| TcLensError::NetnsError(format!("getifaddrs failed: {}", e)))?;

    let mut interfaces = BTreeMap::new();
    for ifaddr in addrs {
        // one AF_PACKET entry per interface carries the index and MAC
        let Some(link) = ifaddr.address.as_ref().and_then(|a| a.as_link_addr()) else {
            continue;
        };
        let hardware_addr = link
            .addr()
            .map(|mac| normalize_hardware_addr(&mac))
            .unwrap_or_default();
        interfaces.insert(
            link.ifindex() as u32,
            Interface {
                ifindex: link.ifindex() as u32,
                name: ifaddr.interface_name,
                hardware_addr,
            },
        );
    }

    Ok(interfaces.into_values().collect())
}

/// Enumerate the interfaces of `netns` as devices the registry can attach to
pub fn discover_devices(netns: &NetnsHandle) -> Result<Vec<NetDevice>, TcLensError> {
    let interfaces = netns.enter(list_interfaces)??;
    let devices: Vec<NetDevice> = interfaces
        .into_iter()
        .map(|iface| NetDevice::new(iface.ifindex, netns.id(), iface.name))
        .collect();
    debug!(netns = netns.id(), count = devices.len(), "discovered interfaces");
    Ok(devices)
}

/// Current name of `ifindex` in the calling thread's namespace
pub fn interface_name(ifindex: u32) -> Option<String> {
    let interfaces = match if_nameindex() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            debug!(ifindex, error = %e, "if_nameindex failed");
            return None;
        }
    };
    interfaces
        .iter()
        .find(|iface| iface.index() == ifindex)
        .map(|iface| iface.name().to_string_lossy().into_owned())
}

/// Resolve `ifindex` to its live name and hardware address
pub fn link_info(ifindex: u32) -> Result<LinkInfo, AttachError> {
    let interfaces = list_interfaces().map_err(|e| AttachError::Attach(e.to_string()))?;
    interfaces
        .into_iter()
        .find(|iface| iface.ifindex == ifindex)
        .map(|iface| LinkInfo {
            name: iface.name,
            hardware_addr: iface.hardware_addr,
        })
        .ok_or_else(|| AttachError::LinkNotFound(format!("ifindex {}", ifindex)))
}

/// Loopback reports an all-zero MAC, which is no address at all
fn normalize_hardware_addr(mac: &[u8]) -> Vec<u8> {
    if mac.iter().all(|b| *b == 0) {
        Vec::new()
    } else {
        mac.to_vec()
    }
}
