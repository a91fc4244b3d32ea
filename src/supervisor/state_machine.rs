use thiserror::Error;

/// Lifecycle of the supervised backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Idle,
    Spawning,
    Running,
    /// Backend terminated on its own with this exit code.
    Exited(i32),
    ShuttingDown,
    Terminated,
}

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("invalid transition: {0:?} -> {1:?}")]
    InvalidTransition(State, State),
}

pub struct StateMachine {
    pub state: State,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self { state: State::Idle }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_transition(&self, to: &State) -> bool {
        matches!(
            (&self.state, to),
            (State::Idle, State::Spawning)
                | (State::Spawning, State::Running)
                | (State::Spawning, State::Terminated)
                | (State::Running, State::Exited(_))
                | (State::Running, State::ShuttingDown)
                | (State::ShuttingDown, State::Terminated)
        )
    }

    pub fn transition(&mut self, to: State) -> Result<(), TransitionError> {
        if self.can_transition(&to) {
            tracing::info!("State transition: {:?} -> {:?}", self.state, to);
            self.state = to;
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.state.clone(), to))
        }
    }
}
