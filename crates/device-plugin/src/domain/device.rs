use serde::Deserialize;
use serde::Serialize;

/// Health of a device as advertised to the kubelet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
pub enum Health {
    Healthy,
    Unhealthy,
}

impl Health {
    /// Wire representation used by the device plugin API.
    pub fn as_str(self) -> &'static str {
        match self {
            Health::Healthy => "Healthy",
            Health::Unhealthy => "Unhealthy",
        }
    }
}

/// Whether a device is reserved by a container.
///
/// Independent from [`Health`]: a claimed device can still be healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
pub enum ClaimState {
    Free,
    Claimed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: String,
    pub health: Health,
    pub claim: ClaimState,
}

impl Device {
    /// A healthy, unclaimed device.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            health: Health::Healthy,
            claim: ClaimState::Free,
        }
    }

    pub fn with_health(mut self, health: Health) -> Self {
        self.health = health;
        self
    }

    pub fn is_claimed(&self) -> bool {
        self.claim == ClaimState::Claimed
    }
}
