use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tonic::Request;
use tower::service_fn;
use tracing::info;

use super::api::registration_client;
use super::api::DevicePluginOptions;
use super::api::RegisterRequest;
use super::PluginError;
use super::API_VERSION;
use crate::domain::PluginOptions;

/// Announces the plugin to the kubelet.
///
/// Implementations make a single attempt and must return within a bounded
/// time; retrying is up to the caller.
#[async_trait::async_trait]
pub trait Registrar: Send + Sync {
    /// Register `endpoint` (the plugin socket's file name inside the kubelet's
    /// device plugin directory) for `resource_name` with the kubelet listening
    /// on `kubelet_socket`.
    async fn register(
        &self,
        kubelet_socket: &Path,
        endpoint: &str,
        resource_name: &str,
    ) -> Result<(), Report<PluginError>>;
}

/// gRPC `Registration` client speaking to the kubelet over its unix socket.
#[derive(Debug, Clone)]
pub struct RegistrationClient {
    options: PluginOptions,
    timeout: Duration,
}

impl RegistrationClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(options: PluginOptions, timeout: Duration) -> Self {
        Self { options, timeout }
    }

    async fn send_register(
        &self,
        kubelet_socket: &Path,
        request: RegisterRequest,
    ) -> Result<(), Report<PluginError>> {
        let channel = create_uds_channel(kubelet_socket.to_path_buf())
            .await
            .change_context_lazy(|| PluginError::RegistrationFailed {
                message: format!("cannot connect to kubelet socket {kubelet_socket:?}"),
            })?;

        registration_client::RegistrationClient::new(channel)
            .register(Request::new(request))
            .await
            .change_context(PluginError::RegistrationFailed {
                message: "kubelet rejected the registration".to_string(),
            })?;
        Ok(())
    }
}

impl Default for RegistrationClient {
    fn default() -> Self {
        Self::new(PluginOptions::default(), Self::DEFAULT_TIMEOUT)
    }
}

#[async_trait::async_trait]
impl Registrar for RegistrationClient {
    async fn register(
        &self,
        kubelet_socket: &Path,
        endpoint: &str,
        resource_name: &str,
    ) -> Result<(), Report<PluginError>> {
        info!(
            endpoint,
            resource_name, "registering device plugin with kubelet: {:?}", kubelet_socket
        );

        let request = RegisterRequest {
            version: API_VERSION.to_string(),
            endpoint: endpoint.to_string(),
            resource_name: resource_name.to_string(),
            options: Some(DevicePluginOptions::from(self.options)),
        };

        tokio::time::timeout(self.timeout, self.send_register(kubelet_socket, request))
            .await
            .map_err(|_| {
                Report::new(PluginError::RegistrationFailed {
                    message: format!("no answer from kubelet within {:?}", self.timeout),
                })
            })??;

        info!("successfully registered device plugin with kubelet");
        Ok(())
    }
}

/// Create a gRPC channel connected to a unix socket.
///
/// The HTTP URL is a placeholder, the connector ignores it.
pub async fn create_uds_channel(
    socket_path: PathBuf,
) -> Result<Channel, tonic::transport::Error> {
    Endpoint::from_static("http://[::]:50051")
        .connect_with_connector(service_fn(move |_: Uri| {
            let socket_path = socket_path.clone();
            async move { UnixStream::connect(socket_path).await.map(TokioIo::new) }
        }))
        .await
}
