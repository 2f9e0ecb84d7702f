//! Recording state management
//!
//! Recorder state, session metadata and the events broadcast to observers.

use crate::container::format::ContainerIndex;
use crate::container::types::MediaKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Current state of the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No active session; a stopped session may still be draining
    #[default]
    Idle,
    /// A session is active
    Recording,
}

/// Information about a recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,

    pub started_at: DateTime<Utc>,

    /// Final container path; the file only appears there once finalized
    pub output_path: PathBuf,

    /// Track names in registration order
    pub tracks: Vec<String>,
}

/// Events emitted during recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RecordingEvent {
    /// Session created and tracks starting
    Started(SessionInfo),

    /// A track is running and accepting frames
    #[serde(rename_all = "camelCase")]
    TrackReady {
        session_id: Uuid,
        track: String,
        kind: MediaKind,
    },

    /// A track stopped; `failure` is set if it stopped through a fault
    #[serde(rename_all = "camelCase")]
    TrackStopped {
        session_id: Uuid,
        track: String,
        failure: Option<String>,
    },

    /// Stop requested, tracks draining
    #[serde(rename_all = "camelCase")]
    Stopping { session_id: Uuid },

    /// Container closed and written to its final path
    #[serde(rename_all = "camelCase")]
    Finalized {
        session_id: Uuid,
        output_path: PathBuf,
        index: ContainerIndex,
    },

    /// Container discarded without output
    #[serde(rename_all = "camelCase")]
    Aborted { session_id: Uuid },

    #[serde(rename_all = "camelCase")]
    Error {
        session_id: Option<Uuid>,
        message: String,
    },
}

impl RecordingEvent {
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            RecordingEvent::Started(info) => Some(info.id),
            RecordingEvent::TrackReady { session_id, .. }
            | RecordingEvent::TrackStopped { session_id, .. }
            | RecordingEvent::Stopping { session_id }
            | RecordingEvent::Finalized { session_id, .. }
            | RecordingEvent::Aborted { session_id } => Some(*session_id),
            RecordingEvent::Error { session_id, .. } => *session_id,
        }
    }

    /// Whether this event ends its session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordingEvent::Finalized { .. } | RecordingEvent::Aborted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let id = Uuid::new_v4();
        let event = RecordingEvent::TrackStopped {
            session_id: id,
            track: "video".to_string(),
            failure: Some("encoder fault".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "trackStopped");
        assert_eq!(json["sessionId"], id.to_string());
        assert_eq!(json["failure"], "encoder fault");
        assert_eq!(event.session_id(), Some(id));
        assert!(!event.is_terminal());
        assert!(RecordingEvent::Aborted { session_id: id }.is_terminal());
    }
}
