//! Plugin lifecycle: socket ownership, registration and recovery.
//!
//! [`state::transition`] is the whole policy as a pure function;
//! [`LifecycleController`] executes the effects it asks for and feeds the
//! outcomes back in as events.

pub mod controller;
pub mod state;

pub use controller::LifecycleController;
pub use controller::Outcome;
pub use state::AfterStop;
pub use state::Effect;
pub use state::Event;
pub use state::PluginState;
pub use state::Transition;

/// External inputs of the lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// The kubelet socket was recreated.
    RestartDetected,
    /// The directory watch reported a failure. Logged only.
    WatchError(String),
    /// Re-register from scratch without exiting.
    Reload,
    /// Stop and exit.
    Terminate,
}
