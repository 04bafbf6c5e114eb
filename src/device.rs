//! Network device identity
//!
//! A device is identified by its interface index inside a network namespace.
//! The interface name is carried for display only: interfaces get renamed,
//! so it never participates in lookups.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Lookup identity of a network device: `(ifindex, netns)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub ifindex: u32,
    pub netns: u32,
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.ifindex, self.netns)
    }
}

/// A network interface as reported by discovery
#[derive(Debug, Clone)]
pub struct NetDevice {
    pub ifindex: u32,
    pub netns: u32,
    pub name: String,
}

impl NetDevice {
    pub fn new(ifindex: u32, netns: u32, name: impl Into<String>) -> Self {
        Self {
            ifindex,
            netns,
            name: name.into(),
        }
    }

    pub fn device_key(&self) -> DeviceKey {
        DeviceKey {
            ifindex: self.ifindex,
            netns: self.netns,
        }
    }

    /// Stable string form, `"{ifindex}_{netns}"`
    pub fn key(&self) -> String {
        self.device_key().to_string()
    }
}

impl PartialEq for NetDevice {
    fn eq(&self, other: &Self) -> bool {
        self.device_key() == other.device_key()
    }
}

impl Eq for NetDevice {}

impl Hash for NetDevice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.device_key().hash(state);
    }
}

impl fmt::Display for NetDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(ifindex={}, netns={})", self.name, self.ifindex, self.netns)
    }
}
