//! Kubelet device plugin integration.
//!
//! The main components are:
//! - [`device_plugin`]: the `DevicePlugin` gRPC service served on the plugin socket
//! - [`registration`]: the one-shot `Register` call against the kubelet socket
//! - [`restart_watcher`]: detects kubelet restarts through its socket being recreated

#![allow(clippy::doc_markdown)]

use core::error::Error;

pub mod device_plugin;
pub mod registration;
pub mod restart_watcher;

pub use device_plugin::DevicePluginService;
pub use device_plugin::PluginServer;
pub use registration::Registrar;
pub use registration::RegistrationClient;
pub use restart_watcher::RestartWatcher;

/// Generated kubelet device plugin API.
pub mod api {
    #![allow(clippy::doc_overindented_list_items)]
    tonic::include_proto!("v1beta1");
}

/// Device plugin API version announced during registration.
pub const API_VERSION: &str = "v1beta1";

/// Errors that can occur while talking to the kubelet or serving the plugin socket.
#[derive(Debug, derive_more::Display)]
pub enum PluginError {
    #[display("Failed to bind plugin socket: {message}")]
    BindFailed { message: String },
    #[display("Failed to remove plugin socket: {message}")]
    SocketCleanupFailed { message: String },
    #[display("Failed to register with kubelet: {message}")]
    RegistrationFailed { message: String },
    #[display("Failed to watch kubelet socket directory: {message}")]
    WatchFailed { message: String },
}

impl Error for PluginError {}
