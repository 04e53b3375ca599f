//! Stage health registry
//!
//! Each stage thread records its status on entry and exit. A stage that dies
//! on a runtime error is therefore visible to the pipeline owner instead of
//! silently stalling its queue.

use parking_lot::Mutex;
use std::fmt;
use tracing::debug;

/// How a stage loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageExit {
    /// Input exhausted and every output handed on
    Completed,
    /// Stopped through its cancellation token
    Cancelled,
    /// Fatal runtime error
    Failed(String),
}

/// Current status of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

impl StageStatus {
    /// True once the stage thread has exited.
    pub fn is_finished(&self) -> bool {
        !matches!(self, StageStatus::Idle | StageStatus::Running)
    }
}

impl From<StageExit> for StageStatus {
    fn from(exit: StageExit) -> Self {
        match exit {
            StageExit::Completed => StageStatus::Completed,
            StageExit::Cancelled => StageStatus::Cancelled,
            StageExit::Failed(reason) => StageStatus::Failed(reason),
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Idle => write!(f, "idle"),
            StageStatus::Running => write!(f, "running"),
            StageStatus::Completed => write!(f, "completed"),
            StageStatus::Cancelled => write!(f, "cancelled"),
            StageStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Shared status of every registered stage, in registration order.
#[derive(Debug, Default)]
pub struct PipelineHealth {
    stages: Mutex<Vec<(&'static str, StageStatus)>>,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage in `Idle`. Registering an existing name resets it.
    pub fn register(&self, stage: &'static str) {
        self.update(stage, StageStatus::Idle);
    }

    pub fn update(&self, stage: &'static str, status: StageStatus) {
        debug!(stage, %status, "Stage status changed");
        let mut stages = self.stages.lock();
        match stages.iter_mut().find(|(name, _)| *name == stage) {
            Some((_, current)) => *current = status,
            None => stages.push((stage, status)),
        }
    }

    pub fn status(&self, stage: &str) -> Option<StageStatus> {
        self.stages
            .lock()
            .iter()
            .find(|(name, _)| *name == stage)
            .map(|(_, status)| status.clone())
    }

    /// Stages that exited on a fatal error, with the reason.
    pub fn failures(&self) -> Vec<(&'static str, String)> {
        self.stages
            .lock()
            .iter()
            .filter_map(|(name, status)| match status {
                StageStatus::Failed(reason) => Some((*name, reason.clone())),
                _ => None,
            })
            .collect()
    }

    /// True when every registered stage has exited.
    pub fn all_finished(&self) -> bool {
        self.stages.lock().iter().all(|(_, status)| status.is_finished())
    }

    pub fn snapshot(&self) -> Vec<(&'static str, StageStatus)> {
        self.stages.lock().clone()
    }
}
