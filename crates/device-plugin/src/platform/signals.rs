use std::io;

use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::lifecycle::ControlEvent;

/// Forward process signals to the lifecycle controller.
///
/// SIGHUP asks for a fresh registration cycle; SIGTERM, SIGINT and SIGQUIT ask
/// for a graceful stop. The task ends once the controller drops its receiver.
pub fn forward_signals(events: mpsc::UnboundedSender<ControlEvent>) -> io::Result<JoinHandle<()>> {
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigquit = signal(SignalKind::quit())?;

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = sighup.recv() => {
                    info!("Received SIGHUP, restarting plugin");
                    ControlEvent::Reload
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                    ControlEvent::Terminate
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                    ControlEvent::Terminate
                }
                _ = sigquit.recv() => {
                    info!("Received SIGQUIT, initiating graceful shutdown");
                    ControlEvent::Terminate
                }
            };
            if events.send(event).is_err() {
                break;
            }
        }
    }))
}
