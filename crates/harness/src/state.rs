//! Deployment lifecycle states

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{HarnessError, HarnessResult};

/// Lifecycle of a single deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentState {
    Created,
    Publishing,
    /// Publish-only deployment finished
    Published,
    Launched,
    Running,
    /// Host exited on its own
    Exited,
    /// Host was terminated by the harness
    Killed,
    /// Publish or launch aborted the chain
    Failed,
}

impl DeploymentState {
    fn can_transition_to(self, next: DeploymentState) -> bool {
        use DeploymentState::*;
        matches!(
            (self, next),
            (Created, Publishing)
                | (Publishing, Published)
                | (Publishing, Launched)
                | (Publishing, Failed)
                | (Launched, Running)
                | (Launched, Failed)
                | (Running, Exited)
                | (Running, Killed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentState::Published
                | DeploymentState::Exited
                | DeploymentState::Killed
                | DeploymentState::Failed
        )
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentState::Created => "created",
            DeploymentState::Publishing => "publishing",
            DeploymentState::Published => "published",
            DeploymentState::Launched => "launched",
            DeploymentState::Running => "running",
            DeploymentState::Exited => "exited",
            DeploymentState::Killed => "killed",
            DeploymentState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// State shared between a deployer and the exit watcher of its host
#[derive(Debug, Clone)]
pub struct StateCell(Arc<Mutex<DeploymentState>>);

impl StateCell {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(DeploymentState::Created)))
    }

    pub fn get(&self) -> DeploymentState {
        *self.0.lock()
    }

    pub fn advance(&self, next: DeploymentState) -> HarnessResult<()> {
        let mut current = self.0.lock();
        if !current.can_transition_to(next) {
            return Err(HarnessError::InvalidStateTransition {
                from: *current,
                to: next,
            });
        }
        *current = next;
        Ok(())
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
