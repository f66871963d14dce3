use std::net::SocketAddr;
use std::sync::Arc;

use error_stack::Report;
use poem::get;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::post;
use poem::put;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use super::errors::ApiError;
use super::handlers::list_devices;
use super::handlers::release_device;
use super::handlers::set_device_health;
use crate::domain::DeviceInventory;
use crate::lifecycle::PluginState;

/// Debug HTTP server exposing the device inventory.
pub struct DebugServer {
    inventory: Arc<DeviceInventory>,
    state: watch::Receiver<PluginState>,
    listen_addr: SocketAddr,
}

impl DebugServer {
    pub fn new(
        inventory: Arc<DeviceInventory>,
        state: watch::Receiver<PluginState>,
        listen_addr: SocketAddr,
    ) -> Self {
        Self {
            inventory,
            state,
            listen_addr,
        }
    }

    pub(crate) fn routes(&self) -> impl Endpoint {
        Route::new()
            .at("/api/v1/devices", get(list_devices))
            .at("/api/v1/devices/:id/health", put(set_device_health))
            .at("/api/v1/devices/:id/release", post(release_device))
            .data(self.inventory.clone())
            .data(self.state.clone())
            .with(Tracing)
    }

    /// Serve until `cancellation_token` is cancelled.
    ///
    /// # Errors
    ///
    /// - [`ApiError::ServerError`] if the server fails to bind or stops unexpectedly
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<(), Report<ApiError>> {
        info!("Starting debug HTTP server on {}", self.listen_addr);

        let app = self.routes();
        let server = Server::new(TcpListener::bind(self.listen_addr));

        tokio::select! {
            result = server.run(app) => match result {
                Ok(()) => {
                    info!("Debug server stopped");
                    Ok(())
                }
                Err(e) => {
                    error!("Debug server failed: {e}");
                    Err(Report::new(ApiError::ServerError {
                        message: format!("{}: {e}", self.listen_addr),
                    }))
                }
            },
            _ = cancellation_token.cancelled() => {
                info!("Debug server shutdown requested");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use poem::http::StatusCode;
    use poem::test::TestClient;
    use serde_json::json;
    use serde_json::Value;
    use test_log::test;

    use super::*;
    use crate::domain::Device;
    use crate::domain::Health;

    fn server() -> (Arc<DeviceInventory>, watch::Sender<PluginState>, DebugServer) {
        let inventory = Arc::new(
            DeviceInventory::new(vec![Device::new("acc-0"), Device::new("acc-1")])
                .expect("unique ids"),
        );
        let (state_tx, state_rx) = watch::channel(PluginState::Registered);
        let server = DebugServer::new(
            inventory.clone(),
            state_rx,
            "127.0.0.1:0".parse().expect("valid address"),
        );
        (inventory, state_tx, server)
    }

    #[test(tokio::test)]
    async fn lists_devices_with_counts_and_state() {
        let (inventory, _state, server) = server();
        inventory.claim(&["acc-1".to_string()]).expect("should claim");
        let client = TestClient::new(server.routes());

        let resp = client.get("/api/v1/devices").send().await;
        resp.assert_status_is_ok();
        let body: Value = resp.json().await.value().deserialize();

        assert_eq!(body["state"], "Registered");
        assert_eq!(body["total"], 2);
        assert_eq!(body["free"], 1);
        assert_eq!(body["claimed"], 1);
        assert_eq!(body["healthy"], 2);
        assert_eq!(body["devices"][1]["claim"], "Claimed");
    }

    #[test(tokio::test)]
    async fn put_health_updates_inventory() {
        let (inventory, _state, server) = server();
        let client = TestClient::new(server.routes());

        let resp = client
            .put("/api/v1/devices/acc-0/health")
            .body_json(&json!({ "health": "Unhealthy" }))
            .send()
            .await;
        resp.assert_status_is_ok();

        let device = inventory.get("acc-0").expect("device exists");
        assert_eq!(device.health, Health::Unhealthy);
    }

    #[test(tokio::test)]
    async fn put_health_of_unknown_device_is_not_found() {
        let (_inventory, _state, server) = server();
        let client = TestClient::new(server.routes());

        let resp = client
            .put("/api/v1/devices/acc-9/health")
            .body_json(&json!({ "health": "Healthy" }))
            .send()
            .await;
        resp.assert_status(StatusCode::NOT_FOUND);
    }

    #[test(tokio::test)]
    async fn release_frees_claimed_device() {
        let (inventory, _state, server) = server();
        inventory.claim(&["acc-0".to_string()]).expect("should claim");
        let client = TestClient::new(server.routes());

        client
            .post("/api/v1/devices/acc-0/release")
            .send()
            .await
            .assert_status_is_ok();
        assert!(!inventory.get("acc-0").expect("device exists").is_claimed());

        // unknown ids are a no-op
        client
            .post("/api/v1/devices/acc-9/release")
            .send()
            .await
            .assert_status_is_ok();
    }

    #[test(tokio::test)]
    async fn run_returns_when_cancelled() {
        let (_inventory, _state, server) = server();
        let token = CancellationToken::new();
        token.cancel();

        server.run(token).await.expect("should stop cleanly");
    }
}
