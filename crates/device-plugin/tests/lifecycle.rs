//! Full plugin lifecycle against a fake kubelet

use std::sync::Arc;
use std::time::Duration;

use device_plugin::config::PluginConfig;
use device_plugin::domain::AllocationService;
use device_plugin::domain::Device;
use device_plugin::domain::DeviceInventory;
use device_plugin::domain::PlaceholderMounts;
use device_plugin::k8s::api::device_plugin_client::DevicePluginClient;
use device_plugin::k8s::api::registration_server::Registration;
use device_plugin::k8s::api::registration_server::RegistrationServer;
use device_plugin::k8s::api::Empty;
use device_plugin::k8s::api::RegisterRequest;
use device_plugin::k8s::registration::create_uds_channel;
use device_plugin::k8s::RegistrationClient;
use device_plugin::lifecycle::ControlEvent;
use device_plugin::lifecycle::LifecycleController;
use device_plugin::lifecycle::Outcome;
use device_plugin::lifecycle::PluginState;
use similar_asserts::assert_eq;
use tempfile::TempDir;
use test_log::test;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::Request;
use tonic::Response;
use tonic::Status;

struct FakeKubelet {
    requests: mpsc::UnboundedSender<RegisterRequest>,
}

#[tonic::async_trait]
impl Registration for FakeKubelet {
    async fn register(&self, request: Request<RegisterRequest>) -> Result<Response<Empty>, Status> {
        let _ = self.requests.send(request.into_inner());
        Ok(Response::new(Empty {}))
    }
}

fn config(dir: &TempDir) -> PluginConfig {
    PluginConfig {
        plugin_dir: dir.path().to_path_buf(),
        socket_name: "accelerator.sock".to_string(),
        kubelet_socket_name: "kubelet.sock".to_string(),
        resource_name: "vendor.example/accelerator".to_string(),
        register_timeout: Duration::from_secs(5),
        backoff: Duration::from_secs(30),
    }
}

fn allocation() -> Arc<AllocationService> {
    let inventory = Arc::new(
        DeviceInventory::new([Device::new("acc-0"), Device::new("acc-1")]).expect("unique ids"),
    );
    Arc::new(AllocationService::new(
        inventory,
        Arc::new(PlaceholderMounts::new("/dev", "/dev")),
    ))
}

async fn wait_for(states: &mut watch::Receiver<PluginState>, wanted: PluginState) {
    tokio::time::timeout(Duration::from_secs(10), states.wait_for(|s| *s == wanted))
        .await
        .unwrap_or_else(|_| panic!("plugin never reached {wanted}"))
        .expect("controller dropped its state");
}

#[test(tokio::test)]
async fn terminate_ends_watchers_and_removes_socket() {
    let dir = TempDir::new().expect("should create temp dir");
    let config = config(&dir);
    let socket = config.socket_path();

    let (requests_tx, mut requests) = mpsc::unbounded_channel();
    let listener = UnixListener::bind(config.kubelet_socket_path()).expect("should bind");
    let kubelet = tokio::spawn(
        tonic::transport::Server::builder()
            .add_service(RegistrationServer::new(FakeKubelet {
                requests: requests_tx,
            }))
            .serve_with_incoming(UnixListenerStream::new(listener)),
    );

    let allocation = allocation();
    let registrar = RegistrationClient::new(allocation.options(), config.register_timeout);
    let controller = LifecycleController::new(config, allocation, registrar);
    let mut states = controller.subscribe_state();
    let (events, events_rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(controller.run(events_rx));

    wait_for(&mut states, PluginState::Registered).await;
    let request = requests.recv().await.expect("kubelet saw the registration");
    assert_eq!(request.endpoint, "accelerator.sock");
    assert!(socket.exists());

    let channel = create_uds_channel(socket.clone())
        .await
        .expect("should connect to plugin");
    let mut stream = DevicePluginClient::new(channel)
        .list_and_watch(Empty {})
        .await
        .expect("list and watch rpc")
        .into_inner();
    let first = stream
        .message()
        .await
        .expect("stream should not fail")
        .expect("initial device list");
    assert_eq!(first.devices.len(), 2);

    events.send(ControlEvent::Terminate).expect("controller is running");

    let end = tokio::time::timeout(Duration::from_secs(10), stream.message())
        .await
        .expect("stream should end within timeout")
        .expect("stream should end without error");
    assert!(end.is_none());

    let outcome = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("controller should exit")
        .expect("controller task should not panic");
    assert_eq!(outcome, Outcome::Clean);
    assert_eq!(*states.borrow(), PluginState::Stopped);
    assert!(!socket.exists());

    kubelet.abort();
}

#[test(tokio::test)]
async fn kubelet_restart_triggers_reregistration() {
    let dir = TempDir::new().expect("should create temp dir");
    let config = config(&dir);

    let (requests_tx, mut requests) = mpsc::unbounded_channel();
    let listener = UnixListener::bind(config.kubelet_socket_path()).expect("should bind");
    let kubelet = tokio::spawn(
        tonic::transport::Server::builder()
            .add_service(RegistrationServer::new(FakeKubelet {
                requests: requests_tx,
            }))
            .serve_with_incoming(UnixListenerStream::new(listener)),
    );

    let allocation = allocation();
    let registrar = RegistrationClient::new(allocation.options(), config.register_timeout);
    let controller = LifecycleController::new(config, allocation, registrar);
    let mut states = controller.subscribe_state();
    let (events, events_rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(controller.run(events_rx));

    wait_for(&mut states, PluginState::Registered).await;
    requests.recv().await.expect("first registration");

    events
        .send(ControlEvent::RestartDetected)
        .expect("controller is running");
    let again = tokio::time::timeout(Duration::from_secs(10), requests.recv())
        .await
        .expect("registered again within timeout")
        .expect("second registration");
    assert_eq!(again.resource_name, "vendor.example/accelerator");
    wait_for(&mut states, PluginState::Registered).await;

    drop(events);
    let outcome = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("controller should exit")
        .expect("controller task should not panic");
    assert_eq!(outcome, Outcome::Clean);

    kubelet.abort();
}
