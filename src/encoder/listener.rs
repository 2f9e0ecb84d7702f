//! Track lifecycle notifications

use super::track::TrackInput;

/// Receives a track's ready/stopped transitions
///
/// Both callbacks run on the track's worker thread and may race with control
/// operations on other threads.
pub trait LifecycleListener: Send + Sync {
    /// The track is running; `input` accepts raw frames from now on
    fn on_ready(&self, input: &TrackInput);

    /// The track stopped, cleanly or not; drop any held input
    fn on_stopped(&self, input: &TrackInput);
}

/// Listener that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl LifecycleListener for NoopListener {
    fn on_ready(&self, _input: &TrackInput) {}

    fn on_stopped(&self, _input: &TrackInput) {}
}
