use std::path::PathBuf;

use serde::Serialize;

use super::device::Device;

/// Source of the fixed device list the plugin advertises.
pub trait DeviceDiscovery {
    fn discover(&self) -> Vec<Device>;
}

/// Discovery stand-in that names `count` healthy devices
/// `<prefix>-<node_name>-<index>`.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    prefix: String,
    node_name: String,
    count: usize,
}

impl StaticDiscovery {
    pub fn new(prefix: impl Into<String>, node_name: impl Into<String>, count: usize) -> Self {
        Self {
            prefix: prefix.into(),
            node_name: node_name.into(),
            count,
        }
    }
}

impl DeviceDiscovery for StaticDiscovery {
    fn discover(&self) -> Vec<Device> {
        (0..self.count)
            .map(|i| Device::new(format!("{}-{}-{i}", self.prefix, self.node_name)))
            .collect()
    }
}

/// One path to expose inside a container for an allocated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountDescriptor {
    pub container_path: String,
    pub host_path: String,
    pub permissions: String,
}

/// Maps claimed device ids to what the container runtime has to expose.
pub trait DeviceMounts: Send + Sync {
    fn mounts_for(&self, device_ids: &[String]) -> Vec<MountDescriptor>;
}

/// Exposes `<host_root>/<id>` as `<container_root>/<id>` for every device.
///
/// Placeholder until the hardware integration provides real device nodes.
#[derive(Debug, Clone)]
pub struct PlaceholderMounts {
    host_root: PathBuf,
    container_root: PathBuf,
    permissions: String,
}

impl PlaceholderMounts {
    pub fn new(host_root: impl Into<PathBuf>, container_root: impl Into<PathBuf>) -> Self {
        Self {
            host_root: host_root.into(),
            container_root: container_root.into(),
            permissions: "rw".to_string(),
        }
    }
}

impl DeviceMounts for PlaceholderMounts {
    fn mounts_for(&self, device_ids: &[String]) -> Vec<MountDescriptor> {
        device_ids
            .iter()
            .map(|id| MountDescriptor {
                container_path: self.container_root.join(id).to_string_lossy().into_owned(),
                host_path: self.host_root.join(id).to_string_lossy().into_owned(),
                permissions: self.permissions.clone(),
            })
            .collect()
    }
}
