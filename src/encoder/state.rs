//! Track encoder lifecycle
//!
//! PREPARING -> RUNNING -> DRAINING -> STOPPED -> RELEASED. A track that is
//! stopped before it ever ran still passes through DRAINING. Faults jump
//! straight to STOPPED and are tracked separately from the state itself.

use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Preparing,
    Running,
    Draining,
    Stopped,
    Released,
}

impl TrackState {
    /// Regular (non-fault) transition
    pub fn transition(self, next: TrackState) -> RecorderResult<TrackState> {
        use TrackState::*;
        match (self, next) {
            (Preparing, Running)
            | (Preparing, Draining)
            | (Running, Draining)
            | (Draining, Stopped)
            | (Stopped, Released) => Ok(next),
            _ => Err(RecorderError::Lifecycle(format!(
                "invalid track transition {self:?} -> {next:?}"
            ))),
        }
    }

    /// Fault transition, allowed from any live state
    pub fn fail(self) -> RecorderResult<TrackState> {
        match self {
            TrackState::Preparing | TrackState::Running | TrackState::Draining => {
                Ok(TrackState::Stopped)
            }
            _ => Err(RecorderError::Lifecycle(format!(
                "cannot fail a track that is {self:?}"
            ))),
        }
    }

    /// Whether the track still has to report that it stopped
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            TrackState::Preparing | TrackState::Running | TrackState::Draining
        )
    }
}

impl std::fmt::Display for TrackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrackState::Preparing => "preparing",
            TrackState::Running => "running",
            TrackState::Draining => "draining",
            TrackState::Stopped => "stopped",
            TrackState::Released => "released",
        };
        f.write_str(name)
    }
}
