use thiserror::Error;
use uuid::Uuid;

use crate::registry::MissionState;

pub const MAX_ITERATIONS_LIMIT: u32 = 500;

/// Errors surfaced by the mission registry and orchestrator.
#[derive(Debug, Error)]
pub enum MissionError {
    #[error("Mission {0} not found")]
    NotFound(Uuid),

    #[error("Mission {0} is already running")]
    AlreadyRunning(Uuid),

    #[error("Mission {id} cannot be started from state {state}")]
    NotStartable { id: Uuid, state: MissionState },

    #[error("Goal must not be empty")]
    EmptyGoal,

    #[error("max_iterations must be between 1 and 500, got {0}")]
    IterationsOutOfRange(u32),
}
