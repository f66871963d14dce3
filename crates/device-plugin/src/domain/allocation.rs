use std::sync::Arc;

use futures::stream;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use super::device::Device;
use super::discovery::DeviceMounts;
use super::discovery::MountDescriptor;
use super::error::AllocateError;
use super::inventory::DeviceInventory;

/// Optional capabilities announced to the kubelet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginOptions {
    pub pre_start_required: bool,
    pub get_preferred_allocation_available: bool,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            pre_start_required: false,
            get_preferred_allocation_available: true,
        }
    }
}

/// What a single container gets for one successfully claimed request group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationSpec {
    pub device_ids: Vec<String>,
    pub mounts: Vec<MountDescriptor>,
}

/// The device plugin capability set, independent of the gRPC transport.
pub struct AllocationService {
    inventory: Arc<DeviceInventory>,
    mounts: Arc<dyn DeviceMounts>,
    options: PluginOptions,
}

impl AllocationService {
    pub fn new(inventory: Arc<DeviceInventory>, mounts: Arc<dyn DeviceMounts>) -> Self {
        Self {
            inventory,
            mounts,
            options: PluginOptions::default(),
        }
    }

    pub fn inventory(&self) -> &Arc<DeviceInventory> {
        &self.inventory
    }

    pub fn options(&self) -> PluginOptions {
        self.options
    }

    /// Stream of inventory snapshots.
    ///
    /// Yields the current snapshot immediately, then a fresh one after every
    /// health change. Ends without error once `shutdown` is cancelled. Each
    /// item is read after the change notification is consumed, so a
    /// subscriber never sees an older table after a newer one.
    pub fn list_and_watch(
        &self,
        shutdown: CancellationToken,
    ) -> impl Stream<Item = Vec<Device>> + Send + 'static {
        let inventory = self.inventory.clone();
        let changes = inventory.subscribe();

        stream::unfold(
            (inventory, changes, shutdown, true),
            |(inventory, mut changes, shutdown, first)| async move {
                if shutdown.is_cancelled() {
                    return None;
                }
                if !first {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return None,
                        changed = changes.changed() => {
                            if changed.is_err() {
                                return None;
                            }
                        }
                    }
                }
                changes.borrow_and_update();
                let snapshot = inventory.snapshot();
                Some((snapshot, (inventory, changes, shutdown, false)))
            },
        )
    }

    /// Claim the devices of every request group, in order.
    ///
    /// Atomic across the whole call: when a later group fails, the groups
    /// already claimed by this call are released before the error is returned.
    ///
    /// # Errors
    ///
    /// - [`AllocateError::EmptyRequest`] if a group names no device
    /// - [`AllocateError::Claim`] if a group cannot be claimed
    pub fn allocate(&self, requests: &[Vec<String>]) -> Result<Vec<AllocationSpec>, AllocateError> {
        if let Some(group) = requests.iter().position(Vec::is_empty) {
            return Err(AllocateError::EmptyRequest { group });
        }

        let mut specs: Vec<AllocationSpec> = Vec::with_capacity(requests.len());
        for (group, device_ids) in requests.iter().enumerate() {
            match self.inventory.claim(device_ids) {
                Ok(claimed) => {
                    let device_ids: Vec<String> = claimed.into_iter().map(|d| d.id).collect();
                    let mounts = self.mounts.mounts_for(&device_ids);
                    specs.push(AllocationSpec { device_ids, mounts });
                }
                Err(source) => {
                    warn!(group, error = %source, "allocation failed, rolling back");
                    for spec in &specs {
                        self.inventory.release(&spec.device_ids);
                    }
                    return Err(AllocateError::Claim { group, source });
                }
            }
        }

        info!(
            groups = specs.len(),
            devices = specs.iter().map(|s| s.device_ids.len()).sum::<usize>(),
            "allocation completed"
        );
        Ok(specs)
    }

    /// Always empty: every choice is left to the kubelet.
    pub fn preferred_allocation(&self) -> Vec<Vec<String>> {
        Vec::new()
    }

    /// No-op: this hardware needs no preparation before a container starts.
    pub fn pre_start_container(&self, _device_ids: &[String]) {}
}
