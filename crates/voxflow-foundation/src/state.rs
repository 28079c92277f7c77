use crate::error::PipelineError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error { message: String },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Error { .. })
    }

    /// States from which `start()` may (re)launch the pipeline.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            PipelineState::Idle | PipelineState::Stopped | PipelineState::Error { .. }
        )
    }
}

#[derive(Debug)]
pub struct StateManager {
    state: Arc<RwLock<PipelineState>>,
    state_tx: Sender<PipelineState>,
    state_rx: Receiver<PipelineState>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(RwLock::new(PipelineState::Idle)),
            state_tx,
            state_rx,
        }
    }

    /// Apply a state transition. Transitioning to the current state is a
    /// no-op (this is what makes `pause()` while paused and `stop()` while
    /// stopped idempotent); anything outside the lifecycle graph is rejected.
    pub fn transition(&self, new_state: PipelineState) -> Result<(), PipelineError> {
        let mut current = self.state.write();

        if *current == new_state {
            return Ok(());
        }

        let valid = matches!(
            (&*current, &new_state),
            (PipelineState::Idle, PipelineState::Running)
                | (PipelineState::Stopped, PipelineState::Running)
                | (PipelineState::Error { .. }, PipelineState::Running)
                | (PipelineState::Running, PipelineState::Paused)
                | (PipelineState::Paused, PipelineState::Running)
                | (PipelineState::Running, PipelineState::Stopping)
                | (PipelineState::Paused, PipelineState::Stopping)
                | (PipelineState::Stopping, PipelineState::Stopped)
                | (PipelineState::Running, PipelineState::Error { .. })
                | (PipelineState::Paused, PipelineState::Error { .. })
                | (PipelineState::Stopping, PipelineState::Error { .. })
        );

        if !valid {
            return Err(PipelineError::Fatal(format!(
                "Invalid state transition: {:?} -> {:?}",
                *current, new_state
            )));
        }

        tracing::info!("State transition: {:?} -> {:?}", *current, new_state);
        *current = new_state.clone();
        let _ = self.state_tx.send(new_state);
        Ok(())
    }

    pub fn current(&self) -> PipelineState {
        self.state.read().clone()
    }

    pub fn subscribe(&self) -> Receiver<PipelineState> {
        self.state_rx.clone()
    }
}
