use std::ffi::OsString;
use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use notify::Event;
use notify::EventKind;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;

use super::PluginError;
use crate::lifecycle::ControlEvent;

/// Watches the device plugin directory for the kubelet socket being created.
///
/// The kubelet removes and recreates its socket when it restarts, dropping
/// every registration it had. Each creation of that file is forwarded as
/// [`ControlEvent::RestartDetected`]; watcher failures are forwarded as
/// [`ControlEvent::WatchError`]. Dropping the watcher stops it.
pub struct RestartWatcher {
    _watcher: RecommendedWatcher,
}

impl RestartWatcher {
    /// # Errors
    ///
    /// - [`PluginError::WatchFailed`] if the watcher cannot be created or the
    ///   directory cannot be watched
    pub fn new(
        plugin_dir: &Path,
        kubelet_socket_name: &str,
        events: mpsc::UnboundedSender<ControlEvent>,
    ) -> Result<Self, Report<PluginError>> {
        let socket_name = OsString::from(kubelet_socket_name);

        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
                let event = match res {
                    Ok(event) if is_socket_created(&event, &socket_name) => {
                        ControlEvent::RestartDetected
                    }
                    Ok(event) => {
                        debug!("ignoring filesystem event: {:?}", event);
                        return;
                    }
                    Err(e) => ControlEvent::WatchError(e.to_string()),
                };
                // receiver gone means the controller has exited
                let _ = events.send(event);
            })
            .change_context(PluginError::WatchFailed {
                message: "Failed to create filesystem watcher".to_string(),
            })?;

        watcher
            .watch(plugin_dir, RecursiveMode::NonRecursive)
            .change_context_lazy(|| PluginError::WatchFailed {
                message: format!("{plugin_dir:?}"),
            })?;

        info!(
            "watching {:?} for kubelet socket {} re-creation",
            plugin_dir, kubelet_socket_name
        );
        Ok(Self { _watcher: watcher })
    }
}

fn is_socket_created(event: &Event, socket_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(socket_name.as_os_str()))
}
