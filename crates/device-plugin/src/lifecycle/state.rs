use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, derive_more::Display)]
pub enum PluginState {
    Stopped,
    Starting,
    Registering,
    Registered,
    BackoffWait,
    Stopping,
}

/// What to do once the server has been stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterStop {
    Restart,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    ServerStarted,
    ServerFailed,
    RegisterSucceeded,
    RegisterFailed,
    BackoffElapsed,
    RestartDetected,
    Reload,
    Terminate,
    Stopped(AfterStop),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Remove any stale socket, bind a new one and serve on it.
    StartServer,
    /// Stop serving and remove the socket, no follow-up event.
    StopServer,
    Register,
    ArmBackoff,
    CancelBackoff,
    /// Stop serving and remove the socket, then report [`Event::Stopped`].
    Stop(AfterStop),
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: PluginState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: PluginState, effects: impl Into<Vec<Effect>>) -> Self {
        Self {
            next,
            effects: effects.into(),
        }
    }

    fn stay(state: PluginState) -> Self {
        Self::to(state, [])
    }

    pub fn is_noop(&self, from: PluginState) -> bool {
        self.next == from && self.effects.is_empty()
    }
}

/// Next state and the effects to run, in order, for `event` in `state`.
///
/// Pairs not listed here leave the state untouched.
pub fn transition(state: PluginState, event: Event) -> Transition {
    use Effect::*;
    use PluginState::*;

    match (state, event) {
        (Stopped, Event::Start) => Transition::to(Starting, [StartServer]),

        (Starting, Event::ServerStarted) => Transition::to(Registering, [Register]),
        (Starting, Event::ServerFailed) => Transition::to(BackoffWait, [ArmBackoff]),

        (Registering, Event::RegisterSucceeded) => Transition::to(Registered, []),
        (Registering, Event::RegisterFailed) => {
            Transition::to(BackoffWait, [StopServer, ArmBackoff])
        }

        (BackoffWait, Event::BackoffElapsed) => Transition::to(Starting, [StartServer]),
        // the kubelet coming back beats waiting out the timer
        (BackoffWait, Event::RestartDetected | Event::Reload) => {
            Transition::to(Starting, [CancelBackoff, StartServer])
        }

        // the kubelet forgot every registration: go through a full cycle
        (Registered, Event::RestartDetected | Event::Reload) => {
            Transition::to(Stopping, [Stop(AfterStop::Restart)])
        }

        (Stopping, Event::Stopped(AfterStop::Restart)) => Transition::to(Starting, [StartServer]),
        (Stopping, Event::Stopped(AfterStop::Exit)) => Transition::to(Stopped, [Exit]),

        (Stopped, Event::Terminate) => Transition::to(Stopped, [Exit]),
        (Stopping, Event::Terminate) => Transition::stay(Stopping),
        (BackoffWait, Event::Terminate) => {
            Transition::to(Stopping, [CancelBackoff, Stop(AfterStop::Exit)])
        }
        (_, Event::Terminate) => Transition::to(Stopping, [Stop(AfterStop::Exit)]),

        (state, _) => Transition::stay(state),
    }
}
