use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use device_plugin::api::DebugServer;
use device_plugin::config::Cli;
use device_plugin::config::Commands;
use device_plugin::config::DaemonArgs;
use device_plugin::config::PluginConfig;
use device_plugin::domain::AllocationService;
use device_plugin::domain::DeviceDiscovery;
use device_plugin::domain::DeviceInventory;
use device_plugin::domain::PlaceholderMounts;
use device_plugin::domain::StaticDiscovery;
use device_plugin::k8s::RegistrationClient;
use device_plugin::lifecycle::LifecycleController;
use device_plugin::platform::signals::forward_signals;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use utils::version;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(daemon_args) => {
            utils::logging::init(daemon_args.log_format);
            utils::logging::install_panic_hook();
            run_daemon(*daemon_args).await
        }
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<ExitCode> {
    tracing::info!(
        "Starting device plugin daemon {} (branch {})",
        &**version::VERSION,
        version::branch()
    );

    let node_name = daemon_args.resolve_node_name();
    let devices = StaticDiscovery::new(
        daemon_args.device_prefix.clone(),
        node_name.clone(),
        daemon_args.device_count,
    )
    .discover();
    let inventory = Arc::new(DeviceInventory::new(devices).context("build device inventory")?);
    tracing::info!(
        node = %node_name,
        devices = inventory.len(),
        "device inventory ready"
    );

    let mounts = Arc::new(PlaceholderMounts::new(
        daemon_args.host_device_root.clone(),
        daemon_args.container_device_root.clone(),
    ));
    let allocation = Arc::new(AllocationService::new(inventory.clone(), mounts));

    let config = PluginConfig::from(&daemon_args);
    let registrar = RegistrationClient::new(allocation.options(), config.register_timeout);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let signals = forward_signals(events_tx.clone()).context("install signal handlers")?;

    let controller =
        LifecycleController::new(config, allocation, registrar).with_restart_detection(events_tx);

    let shutdown = CancellationToken::new();
    let debug_task = daemon_args.debug_listen_addr.map(|addr| {
        let server = DebugServer::new(inventory.clone(), controller.subscribe_state(), addr);
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run(token).await {
                tracing::error!("debug server exited: {e:?}");
            }
        })
    });

    let outcome = controller.run(events_rx).await;

    shutdown.cancel();
    if let Some(task) = debug_task {
        if let Err(e) = task.await {
            tracing::warn!("debug server task failed: {e}");
        }
    }
    signals.abort();

    Ok(ExitCode::from(outcome.exit_code()))
}
