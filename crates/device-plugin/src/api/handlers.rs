use std::sync::Arc;

use poem::handler;
use poem::http::StatusCode;
use poem::web::Data;
use poem::web::Json;
use poem::web::Path;
use tokio::sync::watch;
use tracing::info;
use tracing::warn;

use super::types::DeviceListResponse;
use super::types::DeviceResponse;
use super::types::SetHealthRequest;
use crate::domain::DeviceInventory;
use crate::lifecycle::PluginState;

/// List every device with its health and claim state.
#[handler]
pub async fn list_devices(
    inventory: Data<&Arc<DeviceInventory>>,
    state: Data<&watch::Receiver<PluginState>>,
) -> Json<DeviceListResponse> {
    let current = *state.borrow();
    Json(DeviceListResponse::new(current, inventory.snapshot()))
}

/// Change a device's health, standing in for a hardware health monitor.
#[handler]
pub async fn set_device_health(
    Path(id): Path<String>,
    Json(request): Json<SetHealthRequest>,
    inventory: Data<&Arc<DeviceInventory>>,
) -> poem::Result<Json<DeviceResponse>> {
    match inventory.set_health(&id, request.health) {
        Ok(changed) => {
            info!(device = %id, health = %request.health, changed, "health set via debug endpoint");
            Ok(Json(DeviceResponse {
                success: true,
                message: if changed {
                    format!("device {id} is now {}", request.health)
                } else {
                    format!("device {id} already {}", request.health)
                },
                device: inventory.get(&id),
            }))
        }
        Err(e) => {
            warn!(device = %id, "health update rejected: {e}");
            Err(poem::Error::from_string(e.to_string(), StatusCode::NOT_FOUND))
        }
    }
}

/// Release a claimed device, e.g. after its container is gone for good.
#[handler]
pub async fn release_device(
    Path(id): Path<String>,
    inventory: Data<&Arc<DeviceInventory>>,
) -> Json<DeviceResponse> {
    inventory.release([id.as_str()]);
    info!(device = %id, "device released via debug endpoint");
    Json(DeviceResponse {
        success: true,
        message: format!("device {id} released"),
        device: inventory.get(&id),
    })
}
