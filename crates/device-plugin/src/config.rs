use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use utils::logging::LogFormat;
use utils::version;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the device plugin daemon
    Daemon(Box<DaemonArgs>),
}

#[derive(Parser, Clone, Debug)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "DEVICE_PLUGIN_DIR",
        default_value = "/var/lib/kubelet/device-plugins/",
        value_hint = clap::ValueHint::DirPath,
        help = "Kubelet device plugin directory holding both the kubelet and the plugin socket"
    )]
    pub plugin_dir: PathBuf,

    #[arg(
        long,
        env = "KUBELET_SOCKET_NAME",
        default_value = "kubelet.sock",
        help = "File name of the kubelet registration socket inside the plugin directory"
    )]
    pub kubelet_socket_name: String,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_SOCKET_NAME",
        default_value = "accelerator.sock",
        help = "File name of this plugin's socket inside the plugin directory"
    )]
    pub socket_name: String,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_RESOURCE_NAME",
        default_value = "vendor.example/accelerator",
        help = "Extended resource name advertised to the kubelet"
    )]
    pub resource_name: String,

    #[arg(
        long,
        env = "DEVICE_COUNT",
        default_value = "1",
        help = "Number of accelerators advertised on this node"
    )]
    pub device_count: usize,

    #[arg(
        long,
        env = "DEVICE_ID_PREFIX",
        default_value = "acc",
        help = "Prefix of generated device ids, ids look like <prefix>-<node>-<index>"
    )]
    pub device_prefix: String,

    #[arg(
        long,
        env = "NODE_NAME",
        help = "Node name used in device ids, defaults to the host name"
    )]
    pub node_name: Option<String>,

    #[arg(
        long,
        env = "HOST_DEVICE_ROOT",
        default_value = "/dev",
        value_hint = clap::ValueHint::DirPath,
        help = "Host directory the allocated device paths are taken from"
    )]
    pub host_device_root: PathBuf,

    #[arg(
        long,
        env = "CONTAINER_DEVICE_ROOT",
        default_value = "/dev",
        help = "Container directory allocated devices are exposed under"
    )]
    pub container_device_root: PathBuf,

    #[arg(
        long,
        default_value = "5",
        help = "Seconds to wait for the kubelet to acknowledge a registration"
    )]
    pub register_timeout_secs: u64,

    #[arg(
        long,
        default_value = "30",
        help = "Seconds to wait before retrying after a failed start or registration"
    )]
    pub backoff_secs: u64,

    #[arg(
        long,
        env = "DEBUG_LISTEN_ADDR",
        help = "Listen address of the debug HTTP endpoint, e.g. 127.0.0.1:8080; disabled when unset"
    )]
    pub debug_listen_addr: Option<SocketAddr>,

    #[arg(
        long,
        env = "LOG_FORMAT",
        default_value = "text",
        help = "Log line format on stderr: text or json"
    )]
    pub log_format: LogFormat,
}

impl DaemonArgs {
    /// Node name from the command line, else the kernel host name, else `localhost`.
    pub fn resolve_node_name(&self) -> String {
        self.node_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| {
                std::fs::read_to_string("/proc/sys/kernel/hostname")
                    .ok()
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
            })
            .unwrap_or_else(|| "localhost".to_string())
    }
}

/// Everything the lifecycle controller needs to know about its environment.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub plugin_dir: PathBuf,
    pub socket_name: String,
    pub kubelet_socket_name: String,
    pub resource_name: String,
    /// Upper bound of one registration call, enforced by the registration client.
    pub register_timeout: Duration,
    pub backoff: Duration,
}

impl PluginConfig {
    /// Path of the socket this plugin serves on.
    pub fn socket_path(&self) -> PathBuf {
        self.plugin_dir.join(&self.socket_name)
    }

    /// Path of the kubelet registration socket.
    pub fn kubelet_socket_path(&self) -> PathBuf {
        self.plugin_dir.join(&self.kubelet_socket_name)
    }
}

impl From<&DaemonArgs> for PluginConfig {
    fn from(args: &DaemonArgs) -> Self {
        Self {
            plugin_dir: args.plugin_dir.clone(),
            socket_name: args.socket_name.clone(),
            kubelet_socket_name: args.kubelet_socket_name.clone(),
            resource_name: args.resource_name.clone(),
            register_timeout: Duration::from_secs(args.register_timeout_secs),
            backoff: Duration::from_secs(args.backoff_secs),
        }
    }
}
