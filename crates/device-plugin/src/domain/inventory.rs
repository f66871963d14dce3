use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use tokio::sync::watch;
use tracing::debug;
use tracing::info;

use super::device::ClaimState;
use super::device::Device;
use super::device::Health;
use super::error::InventoryError;

#[derive(Debug, Clone, Copy)]
struct DeviceEntry {
    health: Health,
    claim: ClaimState,
}

/// Authoritative table of the devices this node advertises.
///
/// Every operation is a single critical section over one mutex, and callers only
/// ever receive copies. Health changes bump a version counter that
/// `ListAndWatch` subscribers wait on.
#[derive(Debug)]
pub struct DeviceInventory {
    devices: Mutex<BTreeMap<String, DeviceEntry>>,
    changes: watch::Sender<u64>,
}

impl DeviceInventory {
    /// Build the inventory from a discovery result.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::DuplicateId`] if two devices share an identifier
    pub fn new(devices: impl IntoIterator<Item = Device>) -> Result<Self, InventoryError> {
        let mut table = BTreeMap::new();
        for device in devices {
            let entry = DeviceEntry {
                health: device.health,
                claim: device.claim,
            };
            if table.insert(device.id.clone(), entry).is_some() {
                return Err(InventoryError::DuplicateId { id: device.id });
            }
        }

        let (changes, _) = watch::channel(0);
        Ok(Self {
            devices: Mutex::new(table),
            changes,
        })
    }

    // Every mutation validates before it writes, so a panic inside a critical
    // section cannot leave a half-applied change behind.
    fn table(&self) -> MutexGuard<'_, BTreeMap<String, DeviceEntry>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    /// Point-in-time copy of every device, ordered by identifier.
    pub fn snapshot(&self) -> Vec<Device> {
        self.table()
            .iter()
            .map(|(id, entry)| Device {
                id: id.clone(),
                health: entry.health,
                claim: entry.claim,
            })
            .collect()
    }

    /// Copy of a single device, if it exists.
    pub fn get(&self, id: &str) -> Option<Device> {
        self.table().get(id).map(|entry| Device {
            id: id.to_string(),
            health: entry.health,
            claim: entry.claim,
        })
    }

    /// Reserve every device in `ids`, or none of them.
    ///
    /// Duplicate identifiers in `ids` are treated as one. The returned devices
    /// are ordered by identifier.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::NotFound`] if an identifier is unknown
    /// - [`InventoryError::AlreadyClaimed`] if a device is already reserved
    /// - [`InventoryError::Unhealthy`] if a device is currently unhealthy
    pub fn claim<I, S>(&self, ids: I) -> Result<Vec<Device>, InventoryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: BTreeSet<String> = ids.into_iter().map(|id| id.as_ref().to_string()).collect();
        let mut table = self.table();

        for id in &ids {
            let entry = table
                .get(id)
                .ok_or_else(|| InventoryError::NotFound { id: id.clone() })?;
            if entry.claim == ClaimState::Claimed {
                return Err(InventoryError::AlreadyClaimed { id: id.clone() });
            }
            if entry.health == Health::Unhealthy {
                return Err(InventoryError::Unhealthy { id: id.clone() });
            }
        }

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = table.get_mut(&id) {
                entry.claim = ClaimState::Claimed;
                claimed.push(Device {
                    id,
                    health: entry.health,
                    claim: entry.claim,
                });
            }
        }
        debug!(devices = ?claimed.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(), "devices claimed");
        Ok(claimed)
    }

    /// Mark devices free again. Unknown or unclaimed identifiers are skipped.
    pub fn release<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = self.table();
        for id in ids {
            if let Some(entry) = table.get_mut(id.as_ref()) {
                if entry.claim == ClaimState::Claimed {
                    entry.claim = ClaimState::Free;
                    debug!(device = id.as_ref(), "device released");
                }
            }
        }
    }

    /// Update a device's health without touching its claim state.
    ///
    /// Returns whether the health actually changed; subscribers are only woken
    /// when it did.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::NotFound`] if the identifier is unknown
    pub fn set_health(&self, id: &str, health: Health) -> Result<bool, InventoryError> {
        let mut table = self.table();
        let entry = table.get_mut(id).ok_or_else(|| InventoryError::NotFound {
            id: id.to_string(),
        })?;
        if entry.health == health {
            return Ok(false);
        }
        entry.health = health;
        // bumped while the table is still locked so the version order matches
        // the mutation order
        self.changes.send_modify(|version| *version += 1);
        drop(table);

        info!(device = id, %health, "device health changed");
        Ok(true)
    }

    /// Receiver that is marked changed on every health transition.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use similar_asserts::assert_eq;

    use super::*;

    fn inventory(ids: &[&str]) -> DeviceInventory {
        DeviceInventory::new(ids.iter().map(|id| Device::new(*id))).expect("unique ids")
    }

    #[test]
    fn snapshot_is_ordered_by_id() {
        let inventory = inventory(&["acc-2", "acc-0", "acc-1"]);
        let ids: Vec<_> = inventory.snapshot().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["acc-0", "acc-1", "acc-2"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let result = DeviceInventory::new(vec![Device::new("acc-0"), Device::new("acc-0")]);
        assert_eq!(
            result.err(),
            Some(InventoryError::DuplicateId {
                id: "acc-0".to_string()
            })
        );
    }

    #[test]
    fn claim_marks_all_devices() {
        let inventory = inventory(&["acc-0", "acc-1", "acc-2"]);
        let claimed = inventory.claim(["acc-1", "acc-0"]).expect("should claim");

        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].id, "acc-0");
        assert!(inventory.get("acc-0").expect("exists").is_claimed());
        assert!(inventory.get("acc-1").expect("exists").is_claimed());
        assert!(!inventory.get("acc-2").expect("exists").is_claimed());
    }

    #[test]
    fn claim_is_all_or_nothing() {
        let inventory = inventory(&["acc-0", "acc-1"]);
        let before = inventory.snapshot();

        let err = inventory
            .claim(["acc-0", "acc-7"])
            .expect_err("unknown id must fail");
        assert_eq!(
            err,
            InventoryError::NotFound {
                id: "acc-7".to_string()
            }
        );
        assert_eq!(inventory.snapshot(), before);
    }

    #[test]
    fn claiming_a_claimed_device_fails_without_side_effects() {
        let inventory = inventory(&["acc-0", "acc-1"]);
        inventory.claim(["acc-0"]).expect("first claim");
        let before = inventory.snapshot();

        let err = inventory
            .claim(["acc-1", "acc-0"])
            .expect_err("second claim must fail");
        assert_eq!(
            err,
            InventoryError::AlreadyClaimed {
                id: "acc-0".to_string()
            }
        );
        assert_eq!(inventory.snapshot(), before);
        assert!(!inventory.get("acc-1").expect("exists").is_claimed());
    }

    #[test]
    fn unhealthy_devices_cannot_be_claimed() {
        let inventory = inventory(&["acc-0"]);
        inventory
            .set_health("acc-0", Health::Unhealthy)
            .expect("known id");

        let err = inventory.claim(["acc-0"]).expect_err("must fail");
        assert_eq!(
            err,
            InventoryError::Unhealthy {
                id: "acc-0".to_string()
            }
        );
    }

    #[test]
    fn release_is_idempotent_and_ignores_unknown_ids() {
        let inventory = inventory(&["acc-0", "acc-1"]);
        inventory.claim(["acc-0"]).expect("claim");

        inventory.release(["acc-0", "acc-1", "does-not-exist"]);
        inventory.release(["acc-0"]);

        assert!(inventory.snapshot().iter().all(|d| !d.is_claimed()));
    }

    #[test]
    fn health_and_claim_are_independent() {
        let inventory = inventory(&["acc-0"]);
        inventory.claim(["acc-0"]).expect("claim");
        inventory
            .set_health("acc-0", Health::Unhealthy)
            .expect("known id");

        let device = inventory.get("acc-0").expect("exists");
        assert_eq!(device.health, Health::Unhealthy);
        assert_eq!(device.claim, ClaimState::Claimed);

        inventory.release(["acc-0"]);
        let device = inventory.get("acc-0").expect("exists");
        assert_eq!(device.health, Health::Unhealthy);
        assert_eq!(device.claim, ClaimState::Free);
    }

    #[test]
    fn set_health_notifies_only_on_change() {
        let inventory = inventory(&["acc-0"]);
        let mut changes = inventory.subscribe();
        changes.borrow_and_update();

        assert!(!inventory
            .set_health("acc-0", Health::Healthy)
            .expect("known id"));
        assert!(!changes.has_changed().expect("sender alive"));

        assert!(inventory
            .set_health("acc-0", Health::Unhealthy)
            .expect("known id"));
        assert!(changes.has_changed().expect("sender alive"));
    }

    #[test]
    fn set_health_unknown_device() {
        let inventory = inventory(&["acc-0"]);
        let err = inventory
            .set_health("acc-1", Health::Unhealthy)
            .expect_err("unknown id");
        assert_eq!(err.device_id(), "acc-1");
    }

    #[test]
    fn snapshot_stays_complete_under_concurrent_claims() {
        let ids: Vec<String> = (0..16).map(|i| format!("acc-{i:02}")).collect();
        let inventory = Arc::new(
            DeviceInventory::new(ids.iter().map(Device::new)).expect("unique ids"),
        );

        thread::scope(|scope| {
            for chunk in ids.chunks(4) {
                let inventory = inventory.clone();
                scope.spawn(move || {
                    for _ in 0..200 {
                        if inventory.claim(chunk).is_ok() {
                            inventory.release(chunk);
                        }
                    }
                });
            }

            for _ in 0..200 {
                let snapshot: Vec<String> =
                    inventory.snapshot().into_iter().map(|d| d.id).collect();
                assert_eq!(snapshot, ids);
            }
        });
    }
}
