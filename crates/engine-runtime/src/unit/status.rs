use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

/// Life-cycle state of one step copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum UnitState {
    Idle = 0,
    Initializing = 1,
    Running = 2,
    Stopping = 3,
    Finished = 4,
    Failed = 5,
    Stopped = 6,
}

impl UnitState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => UnitState::Initializing,
            2 => UnitState::Running,
            3 => UnitState::Stopping,
            4 => UnitState::Finished,
            5 => UnitState::Failed,
            6 => UnitState::Stopped,
            _ => UnitState::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitState::Idle => "Idle",
            UnitState::Initializing => "Initializing",
            UnitState::Running => "Running",
            UnitState::Stopping => "Stopping",
            UnitState::Finished => "Finished",
            UnitState::Failed => "Failed",
            UnitState::Stopped => "Stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitState::Finished | UnitState::Failed | UnitState::Stopped
        )
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared between a running unit and status readers.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn get(&self) -> UnitState {
        UnitState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: UnitState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
