// ABOUTME: Run lifecycle state machine
// ABOUTME: Tracks INITIALIZED -> RUNNING -> COMPLETED | FAILED with timestamps

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{ExecutionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Initialized,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Initialized, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Initialized => write!(f, "initialized"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunState {
    status: RunStatus,
    history: Vec<(RunStatus, DateTime<Utc>)>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            status: RunStatus::Initialized,
            history: vec![(RunStatus::Initialized, Utc::now())],
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn history(&self) -> &[(RunStatus, DateTime<Utc>)] {
        &self.history
    }

    pub fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ExecutionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        debug!("Run state {} -> {}", self.status, next);
        self.status = next;
        self.history.push((next, Utc::now()));
        Ok(())
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
