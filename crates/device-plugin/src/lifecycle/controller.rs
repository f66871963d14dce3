use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::Sleep;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::state::transition;
use super::state::Effect;
use super::state::Event;
use super::state::PluginState;
use super::ControlEvent;
use crate::config::PluginConfig;
use crate::domain::AllocationService;
use crate::platform::k8s::PluginServer;
use crate::platform::k8s::Registrar;
use crate::platform::k8s::RestartWatcher;

/// How the controller finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stopped and the plugin socket is gone.
    Clean,
    /// Stopped, but the plugin socket could not be removed.
    SocketCleanupFailed,
}

impl Outcome {
    /// Process exit status for this outcome.
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::Clean => 0,
            Outcome::SocketCleanupFailed => 2,
        }
    }
}

/// Drives the plugin through [`PluginState`] until it is told to terminate.
///
/// A single task owns the server, the backoff timer and the state; the
/// allocation service keeps serving on its own tasks in between.
pub struct LifecycleController<R> {
    config: PluginConfig,
    allocation: Arc<AllocationService>,
    registrar: R,
    state: watch::Sender<PluginState>,
    server: Option<PluginServer>,
    backoff: Option<Pin<Box<Sleep>>>,
    cleanup_failed: bool,
    /// Where kubelet restarts are reported; `None` disables restart detection.
    restart_events: Option<mpsc::UnboundedSender<ControlEvent>>,
    watcher: Option<RestartWatcher>,
}

impl<R: Registrar> LifecycleController<R> {
    pub fn new(config: PluginConfig, allocation: Arc<AllocationService>, registrar: R) -> Self {
        let (state, _) = watch::channel(PluginState::Stopped);
        Self {
            config,
            allocation,
            registrar,
            state,
            server: None,
            backoff: None,
            cleanup_failed: false,
            restart_events: None,
            watcher: None,
        }
    }

    /// Watch the plugin directory for kubelet restarts and report them on `events`.
    ///
    /// The watch is (re)tried on every server start until it succeeds, so a
    /// plugin directory that appears late is still picked up.
    pub fn with_restart_detection(mut self, events: mpsc::UnboundedSender<ControlEvent>) -> Self {
        self.restart_events = Some(events);
        self
    }

    /// Receiver that always holds the current state.
    pub fn subscribe_state(&self) -> watch::Receiver<PluginState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> PluginState {
        *self.state.borrow()
    }

    /// Run until a terminate request has been fully processed.
    ///
    /// A closed `events` channel is treated as a terminate request.
    #[tracing::instrument(skip_all)]
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ControlEvent>) -> Outcome {
        info!(
            resource = %self.config.resource_name,
            "starting device plugin lifecycle, socket {:?}",
            self.config.socket_path()
        );
        let mut pending = VecDeque::from([Event::Start]);

        loop {
            while let Some(event) = pending.pop_front() {
                let current = self.state();
                let step = transition(current, event);
                if step.is_noop(current) {
                    debug!(state = %current, ?event, "event ignored");
                    continue;
                }
                if step.next != current {
                    info!(from = %current, to = %step.next, ?event, "plugin state changed");
                    self.state.send_replace(step.next);
                }

                for effect in step.effects {
                    if effect == Effect::Exit {
                        return self.outcome();
                    }
                    if let Some(follow_up) = self.apply(effect).await {
                        pending.push_back(follow_up);
                    }
                }
            }

            let event = tokio::select! {
                _ = backoff_elapsed(&mut self.backoff) => {
                    self.backoff = None;
                    Event::BackoffElapsed
                }
                received = events.recv() => match received {
                    Some(ControlEvent::RestartDetected) => {
                        info!("kubelet socket re-created, kubelet restarted");
                        Event::RestartDetected
                    }
                    Some(ControlEvent::Reload) => Event::Reload,
                    Some(ControlEvent::Terminate) => Event::Terminate,
                    Some(ControlEvent::WatchError(message)) => {
                        warn!("kubelet socket watch error: {message}");
                        continue;
                    }
                    None => {
                        warn!("control event sources closed, shutting down");
                        Event::Terminate
                    }
                },
            };
            pending.push_back(event);
        }
    }

    async fn apply(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::StartServer => Some(self.start_server()),
            Effect::Register => Some(self.register().await),
            Effect::StopServer => {
                self.stop_server().await;
                None
            }
            Effect::Stop(after) => {
                self.stop_server().await;
                Some(Event::Stopped(after))
            }
            Effect::ArmBackoff => {
                info!("retrying in {:?}", self.config.backoff);
                self.backoff = Some(Box::pin(tokio::time::sleep(self.config.backoff)));
                None
            }
            Effect::CancelBackoff => {
                self.backoff = None;
                None
            }
            Effect::Exit => None,
        }
    }

    fn ensure_restart_watch(&mut self) {
        if self.watcher.is_some() {
            return;
        }
        let Some(events) = &self.restart_events else {
            return;
        };
        match RestartWatcher::new(
            &self.config.plugin_dir,
            &self.config.kubelet_socket_name,
            events.clone(),
        ) {
            Ok(watcher) => self.watcher = Some(watcher),
            Err(e) => warn!("kubelet restart detection unavailable, will retry: {e:?}"),
        }
    }

    fn start_server(&mut self) -> Event {
        self.ensure_restart_watch();
        match PluginServer::start(self.config.socket_path(), self.allocation.clone()) {
            Ok(server) => {
                self.server = Some(server);
                Event::ServerStarted
            }
            Err(e) => {
                error!("failed to start device plugin server: {e:?}");
                Event::ServerFailed
            }
        }
    }

    /// The registrar bounds its own call, so this returns in bounded time.
    async fn register(&self) -> Event {
        let kubelet_socket = self.config.kubelet_socket_path();
        let attempt = self
            .registrar
            .register(
                &kubelet_socket,
                &self.config.socket_name,
                &self.config.resource_name,
            )
            .await;

        match attempt {
            Ok(()) => Event::RegisterSucceeded,
            Err(e) => {
                error!("failed to register device plugin with kubelet: {e:?}");
                Event::RegisterFailed
            }
        }
    }

    async fn stop_server(&mut self) {
        let Some(server) = self.server.take() else {
            return;
        };
        match server.stop().await {
            Ok(()) => self.cleanup_failed = false,
            Err(e) => {
                error!("failed to clean up plugin socket: {e:?}");
                self.cleanup_failed = true;
            }
        }
    }

    fn outcome(&self) -> Outcome {
        if self.cleanup_failed {
            Outcome::SocketCleanupFailed
        } else {
            info!("device plugin stopped");
            Outcome::Clean
        }
    }
}

async fn backoff_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
