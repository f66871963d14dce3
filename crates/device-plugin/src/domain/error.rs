use core::error::Error;

/// Errors reported by [`DeviceInventory`](super::DeviceInventory) operations.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum InventoryError {
    #[display("device {id} not found")]
    NotFound { id: String },
    #[display("device {id} is already claimed")]
    AlreadyClaimed { id: String },
    #[display("device {id} is unhealthy")]
    Unhealthy { id: String },
    #[display("device {id} is listed more than once")]
    DuplicateId { id: String },
}

impl InventoryError {
    /// Identifier of the device the error refers to.
    pub fn device_id(&self) -> &str {
        match self {
            InventoryError::NotFound { id }
            | InventoryError::AlreadyClaimed { id }
            | InventoryError::Unhealthy { id }
            | InventoryError::DuplicateId { id } => id,
        }
    }
}

impl Error for InventoryError {}

/// Errors returned by [`AllocationService::allocate`](super::AllocationService::allocate).
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum AllocateError {
    #[display("container request {group} does not name any device")]
    EmptyRequest { group: usize },
    #[display("container request {group}: {source}")]
    Claim { group: usize, source: InventoryError },
}

impl Error for AllocateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AllocateError::EmptyRequest { .. } => None,
            AllocateError::Claim { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_error_display_formatting() {
        let not_found = InventoryError::NotFound {
            id: "acc-9".to_string(),
        };
        assert_eq!(not_found.to_string(), "device acc-9 not found");
        assert_eq!(not_found.device_id(), "acc-9");

        let claimed = InventoryError::AlreadyClaimed {
            id: "acc-0".to_string(),
        };
        assert_eq!(claimed.to_string(), "device acc-0 is already claimed");
    }

    #[test]
    fn allocate_error_exposes_claim_source() {
        let err = AllocateError::Claim {
            group: 1,
            source: InventoryError::Unhealthy {
                id: "acc-1".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "container request 1: device acc-1 is unhealthy"
        );
        assert!(err.source().is_some());
    }
}
