use serde::Deserialize;
use serde::Serialize;

use crate::domain::Device;
use crate::domain::Health;
use crate::lifecycle::PluginState;

/// Current capacity of this node as seen by the plugin.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceListResponse {
    pub state: PluginState,
    pub total: usize,
    pub free: usize,
    pub claimed: usize,
    pub healthy: usize,
    pub devices: Vec<Device>,
}

impl DeviceListResponse {
    pub fn new(state: PluginState, devices: Vec<Device>) -> Self {
        let claimed = devices.iter().filter(|d| d.is_claimed()).count();
        let healthy = devices
            .iter()
            .filter(|d| d.health == Health::Healthy)
            .count();
        Self {
            state,
            total: devices.len(),
            free: devices.len() - claimed,
            claimed,
            healthy,
            devices,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetHealthRequest {
    pub health: Health,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceResponse {
    pub success: bool,
    pub message: String,
    pub device: Option<Device>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_derived_from_devices() {
        let mut claimed = Device::new("acc-1").with_health(Health::Unhealthy);
        claimed.claim = crate::domain::ClaimState::Claimed;
        let response =
            DeviceListResponse::new(PluginState::Registered, vec![Device::new("acc-0"), claimed]);

        assert_eq!(response.total, 2);
        assert_eq!(response.free, 1);
        assert_eq!(response.claimed, 1);
        assert_eq!(response.healthy, 1);
    }

    #[test]
    fn device_serializes_with_state_names() {
        let json = serde_json::to_string(&Device::new("acc-0")).expect("should serialize");
        assert_eq!(
            json,
            r#"{"id":"acc-0","health":"Healthy","claim":"Free"}"#
        );
    }
}
