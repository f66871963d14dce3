use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use futures::Stream;
use futures::StreamExt;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::Response;
use tonic::Result as TonicResult;
use tonic::Status;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::api;
use super::api::device_plugin_server::DevicePlugin;
use super::api::device_plugin_server::DevicePluginServer;
use super::api::AllocateRequest;
use super::api::AllocateResponse;
use super::api::ContainerAllocateResponse;
use super::api::ContainerPreferredAllocationResponse;
use super::api::DevicePluginOptions;
use super::api::DeviceSpec;
use super::api::Empty;
use super::api::ListAndWatchResponse;
use super::api::PreStartContainerRequest;
use super::api::PreStartContainerResponse;
use super::api::PreferredAllocationRequest;
use super::api::PreferredAllocationResponse;
use super::PluginError;
use crate::domain::AllocateError;
use crate::domain::AllocationService;
use crate::domain::AllocationSpec;
use crate::domain::Device;
use crate::domain::InventoryError;
use crate::domain::PluginOptions;

/// Upper bound for in-flight requests to drain once shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

impl From<PluginOptions> for DevicePluginOptions {
    fn from(options: PluginOptions) -> Self {
        Self {
            pre_start_required: options.pre_start_required,
            get_preferred_allocation_available: options.get_preferred_allocation_available,
        }
    }
}

impl From<Device> for api::Device {
    fn from(device: Device) -> Self {
        Self {
            id: device.id,
            health: device.health.as_str().to_string(),
            topology: None,
        }
    }
}

impl From<AllocationSpec> for ContainerAllocateResponse {
    fn from(spec: AllocationSpec) -> Self {
        let devices = spec
            .mounts
            .into_iter()
            .map(|mount| DeviceSpec {
                container_path: mount.container_path,
                host_path: mount.host_path,
                permissions: mount.permissions,
            })
            .collect();

        Self {
            envs: HashMap::new(),
            mounts: Vec::new(),
            devices,
            annotations: HashMap::new(),
            cdi_devices: Vec::new(),
        }
    }
}

impl From<AllocateError> for Status {
    fn from(err: AllocateError) -> Self {
        match &err {
            AllocateError::EmptyRequest { .. } => Status::invalid_argument(err.to_string()),
            AllocateError::Claim { source, .. } => match source {
                InventoryError::NotFound { .. } => Status::not_found(err.to_string()),
                InventoryError::AlreadyClaimed { .. } | InventoryError::Unhealthy { .. } => {
                    Status::failed_precondition(err.to_string())
                }
                InventoryError::DuplicateId { .. } => Status::internal(err.to_string()),
            },
        }
    }
}

/// `DevicePlugin` gRPC service backed by an [`AllocationService`].
pub struct DevicePluginService {
    allocation: Arc<AllocationService>,
    /// cancelled when the owning server stops; ends every ListAndWatch stream
    shutdown: CancellationToken,
}

impl DevicePluginService {
    pub fn new(allocation: Arc<AllocationService>, shutdown: CancellationToken) -> Self {
        Self {
            allocation,
            shutdown,
        }
    }
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<DevicePluginOptions>> {
        debug!("getting device plugin options");
        Ok(Response::new(self.allocation.options().into()))
    }

    type ListAndWatchStream =
        Pin<Box<dyn Stream<Item = Result<ListAndWatchResponse, Status>> + Send>>;

    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<Self::ListAndWatchStream>> {
        info!("starting to watch device list");

        let stream = self
            .allocation
            .list_and_watch(self.shutdown.clone())
            .map(|devices| {
                debug!(devices = devices.len(), "sending device list");
                Ok(ListAndWatchResponse {
                    devices: devices.into_iter().map(api::Device::from).collect(),
                })
            });

        Ok(Response::new(Box::pin(stream)))
    }

    async fn get_preferred_allocation(
        &self,
        request: Request<PreferredAllocationRequest>,
    ) -> TonicResult<Response<PreferredAllocationResponse>> {
        debug!("getting preferred device allocation: {:?}", request.get_ref());
        Ok(Response::new(PreferredAllocationResponse {
            container_responses: self
                .allocation
                .preferred_allocation()
                .into_iter()
                .map(|device_ids| ContainerPreferredAllocationResponse { device_ids })
                .collect(),
        }))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> TonicResult<Response<AllocateResponse>> {
        let req = request.into_inner();
        info!("allocating devices to containers: {:?}", req);

        let groups: Vec<Vec<String>> = req
            .container_requests
            .into_iter()
            .map(|container_req| container_req.devices_ids)
            .collect();

        let specs = self.allocation.allocate(&groups).map_err(|e| {
            error!("device allocation rejected: {e}");
            Status::from(e)
        })?;

        Ok(Response::new(AllocateResponse {
            container_responses: specs
                .into_iter()
                .map(ContainerAllocateResponse::from)
                .collect(),
        }))
    }

    async fn pre_start_container(
        &self,
        request: Request<PreStartContainerRequest>,
    ) -> TonicResult<Response<PreStartContainerResponse>> {
        let req = request.into_inner();
        debug!("pre-start container: {:?}", req.devices_ids);
        self.allocation.pre_start_container(&req.devices_ids);
        Ok(Response::new(PreStartContainerResponse {}))
    }
}

/// A `DevicePlugin` server bound to a unix socket.
///
/// Owns the socket file for as long as it runs; [`PluginServer::stop`] is the
/// only way to remove it.
pub struct PluginServer {
    socket_path: PathBuf,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), tonic::transport::Error>>,
}

impl PluginServer {
    /// Remove any stale socket left at `socket_path`, bind it and start serving.
    ///
    /// # Errors
    ///
    /// - [`PluginError::BindFailed`] if the stale socket cannot be removed or
    ///   the new one cannot be bound
    pub fn start(
        socket_path: impl Into<PathBuf>,
        allocation: Arc<AllocationService>,
    ) -> Result<Self, Report<PluginError>> {
        let socket_path = socket_path.into();
        info!("start device plugin server: {:?}", socket_path);

        remove_socket(&socket_path).change_context(PluginError::BindFailed {
            message: format!("stale socket {socket_path:?} could not be removed"),
        })?;

        let listener =
            UnixListener::bind(&socket_path).change_context(PluginError::BindFailed {
                message: format!("bind {socket_path:?}"),
            })?;

        let shutdown = CancellationToken::new();
        let service = DevicePluginService::new(allocation, shutdown.clone());

        let server_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(DevicePluginServer::new(service))
                .serve_with_incoming_shutdown(
                    tokio_stream::wrappers::UnixListenerStream::new(listener),
                    async move {
                        server_shutdown.cancelled().await;
                        info!("shutting down gRPC server");
                    },
                )
                .await
        });

        info!("gRPC server is bound to: {:?}", socket_path);
        Ok(Self {
            socket_path,
            shutdown,
            handle,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop serving, end every open ListAndWatch stream and remove the socket.
    ///
    /// The socket file is only removed after the server task has finished.
    ///
    /// # Errors
    ///
    /// - [`PluginError::SocketCleanupFailed`] if the socket file cannot be removed
    pub async fn stop(self) -> Result<(), Report<PluginError>> {
        info!("stopping device plugin server: {:?}", self.socket_path);
        self.shutdown.cancel();

        let mut handle = self.handle;
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(Ok(()))) => debug!("gRPC server stopped"),
            Ok(Ok(Err(e))) => warn!("gRPC server ended with error: {e}"),
            Ok(Err(e)) => warn!("gRPC server task failed: {e}"),
            Err(_) => {
                warn!("gRPC server did not stop within {SHUTDOWN_GRACE:?}, aborting");
                handle.abort();
                let _ = handle.await;
            }
        }

        remove_socket(&self.socket_path).change_context(PluginError::SocketCleanupFailed {
            message: format!("{:?}", self.socket_path),
        })?;
        info!("removed plugin socket {:?}", self.socket_path);
        Ok(())
    }
}

/// Remove `path` if it exists; a missing file is not an error.
pub(crate) fn remove_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
