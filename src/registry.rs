//! Process-wide table of missions, shared by the HTTP handlers and workers.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AgentSettings;
use crate::error::{MAX_ITERATIONS_LIMIT, MissionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionState {
    Created,
    Running,
    Complete,
    Incomplete,
    Failed,
    Cancelled,
}

impl MissionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MissionState::Complete
                | MissionState::Incomplete
                | MissionState::Failed
                | MissionState::Cancelled
        )
    }
}

impl fmt::Display for MissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissionState::Created => write!(f, "created"),
            MissionState::Running => write!(f, "running"),
            MissionState::Complete => write!(f, "complete"),
            MissionState::Incomplete => write!(f, "incomplete"),
            MissionState::Failed => write!(f, "failed"),
            MissionState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-mission knobs, fixed at creation.
#[derive(Debug, Clone, Serialize)]
pub struct MissionConfig {
    pub headless: bool,
    pub max_iterations: u32,
    pub min_sources: usize,
    pub loop_threshold: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissionRecord {
    pub id: Uuid,
    pub goal: String,
    pub config: MissionConfig,
    pub state: MissionState,
    pub error: Option<String>,
    pub iterations: u32,
    pub sources_visited: usize,
    pub data_points: usize,
    pub created_at: DateTime<Utc>,
}

/// Read-only view returned by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MissionStatus {
    pub mission_id: Uuid,
    pub goal: String,
    pub state: MissionState,
    pub is_running: bool,
    pub is_complete: bool,
    pub error: Option<String>,
    pub iterations: u32,
    pub sources_visited: usize,
    pub data_points: usize,
}

impl From<&MissionRecord> for MissionStatus {
    fn from(record: &MissionRecord) -> Self {
        Self {
            mission_id: record.id,
            goal: record.goal.clone(),
            state: record.state,
            is_running: record.state == MissionState::Running,
            is_complete: matches!(
                record.state,
                MissionState::Complete | MissionState::Incomplete
            ),
            error: record.error.clone(),
            iterations: record.iterations,
            sources_visited: record.sources_visited,
            data_points: record.data_points,
        }
    }
}

struct Entry {
    record: MissionRecord,
    cancel: Option<CancellationToken>,
}

#[derive(Clone, Default)]
pub struct MissionRegistry {
    missions: Arc<DashMap<Uuid, Entry>>,
}

impl MissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a mission in the `Created` state.
    pub fn create(
        &self,
        goal: &str,
        headless: bool,
        max_iterations: u32,
        settings: &AgentSettings,
    ) -> Result<MissionRecord, MissionError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(MissionError::EmptyGoal);
        }
        if !(1..=MAX_ITERATIONS_LIMIT).contains(&max_iterations) {
            return Err(MissionError::IterationsOutOfRange(max_iterations));
        }

        let record = MissionRecord {
            id: Uuid::new_v4(),
            goal: goal.to_string(),
            config: MissionConfig {
                headless,
                max_iterations,
                min_sources: settings.min_sources,
                loop_threshold: settings.loop_threshold,
            },
            state: MissionState::Created,
            error: None,
            iterations: 0,
            sources_visited: 0,
            data_points: 0,
            created_at: Utc::now(),
        };
        self.missions.insert(
            record.id,
            Entry {
                record: record.clone(),
                cancel: None,
            },
        );
        Ok(record)
    }

    pub fn get(&self, id: Uuid) -> Result<MissionRecord, MissionError> {
        self.missions
            .get(&id)
            .map(|entry| entry.record.clone())
            .ok_or(MissionError::NotFound(id))
    }

    pub fn status(&self, id: Uuid) -> Result<MissionStatus, MissionError> {
        self.missions
            .get(&id)
            .map(|entry| MissionStatus::from(&entry.record))
            .ok_or(MissionError::NotFound(id))
    }

    pub fn update<F>(&self, id: Uuid, f: F) -> Result<(), MissionError>
    where
        F: FnOnce(&mut MissionRecord),
    {
        let mut entry = self.missions.get_mut(&id).ok_or(MissionError::NotFound(id))?;
        f(&mut entry.record);
        Ok(())
    }

    /// Move a `Created` mission to `Running` and hand back its cancellation token.
    pub fn begin_run(&self, id: Uuid) -> Result<(MissionRecord, CancellationToken), MissionError> {
        let mut entry = self.missions.get_mut(&id).ok_or(MissionError::NotFound(id))?;
        match entry.record.state {
            MissionState::Created => {}
            MissionState::Running => return Err(MissionError::AlreadyRunning(id)),
            state => return Err(MissionError::NotStartable { id, state }),
        }

        let token = CancellationToken::new();
        entry.record.state = MissionState::Running;
        entry.cancel = Some(token.clone());
        Ok((entry.record.clone(), token))
    }

    /// Ask a mission to stop. A mission that never ran is cancelled on the spot.
    pub fn stop(&self, id: Uuid) -> Result<MissionState, MissionError> {
        let mut entry = self.missions.get_mut(&id).ok_or(MissionError::NotFound(id))?;
        if let Some(token) = &entry.cancel {
            token.cancel();
        }
        if entry.record.state == MissionState::Created {
            entry.record.state = MissionState::Cancelled;
        }
        Ok(entry.record.state)
    }

    /// Cancel (if running) and forget a mission.
    pub fn delete(&self, id: Uuid) -> Result<(), MissionError> {
        let (_, entry) = self.missions.remove(&id).ok_or(MissionError::NotFound(id))?;
        if let Some(token) = entry.cancel {
            token.cancel();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.missions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.missions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_mission() -> (MissionRegistry, Uuid) {
        let registry = MissionRegistry::new();
        let record = registry
            .create("  price of rice  ", true, 10, &AgentSettings::default())
            .unwrap();
        (registry, record.id)
    }

    #[test]
    fn create_validates_input() {
        let registry = MissionRegistry::new();
        let settings = AgentSettings::default();
        assert!(matches!(
            registry.create("   ", true, 10, &settings),
            Err(MissionError::EmptyGoal)
        ));
        assert!(matches!(
            registry.create("goal", true, 0, &settings),
            Err(MissionError::IterationsOutOfRange(0))
        ));
        assert!(matches!(
            registry.create("goal", true, 501, &settings),
            Err(MissionError::IterationsOutOfRange(501))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn create_trims_goal_and_snapshots_settings() {
        let (registry, id) = registry_with_mission();
        let record = registry.get(id).unwrap();
        assert_eq!(record.goal, "price of rice");
        assert_eq!(record.state, MissionState::Created);
        assert_eq!(record.config.min_sources, 5);
        assert_eq!(record.config.max_iterations, 10);
    }

    #[test]
    fn begin_run_only_once() {
        let (registry, id) = registry_with_mission();
        let (record, token) = registry.begin_run(id).unwrap();
        assert_eq!(record.state, MissionState::Running);
        assert!(!token.is_cancelled());

        assert!(matches!(
            registry.begin_run(id),
            Err(MissionError::AlreadyRunning(_))
        ));

        registry
            .update(id, |r| r.state = MissionState::Complete)
            .unwrap();
        assert!(matches!(
            registry.begin_run(id),
            Err(MissionError::NotStartable {
                state: MissionState::Complete,
                ..
            })
        ));
    }

    #[test]
    fn stop_cancels_token_or_created_mission() {
        let (registry, id) = registry_with_mission();
        assert_eq!(registry.stop(id).unwrap(), MissionState::Cancelled);

        let (registry, id) = registry_with_mission();
        let (_, token) = registry.begin_run(id).unwrap();
        assert_eq!(registry.stop(id).unwrap(), MissionState::Running);
        assert!(token.is_cancelled());
    }

    #[test]
    fn delete_cancels_and_removes() {
        let (registry, id) = registry_with_mission();
        let (_, token) = registry.begin_run(id).unwrap();
        registry.delete(id).unwrap();
        assert!(token.is_cancelled());
        assert!(matches!(registry.get(id), Err(MissionError::NotFound(_))));
        assert!(matches!(registry.delete(id), Err(MissionError::NotFound(_))));
    }

    #[test]
    fn status_reflects_state() {
        let (registry, id) = registry_with_mission();
        registry
            .update(id, |r| {
                r.state = MissionState::Incomplete;
                r.sources_visited = 2;
            })
            .unwrap();
        let status = registry.status(id).unwrap();
        assert!(status.is_complete);
        assert!(!status.is_running);
        assert_eq!(status.sources_visited, 2);
        assert_eq!(
            serde_json::to_value(&status).unwrap()["state"],
            "incomplete"
        );
    }
}
