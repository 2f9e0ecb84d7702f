//! Recording session
//!
//! One container and a fixed set of tracks, from setup to finalization.

use super::state::{RecordingEvent, SessionInfo};
use crate::config::Config;
use crate::container::format::CONTAINER_EXTENSION;
use crate::container::sink::{part_path, FileSink};
use crate::container::writer::{ContainerSummary, ContainerWriter, WriterPhase};
use crate::encoder::{LifecycleListener, MediaCodec, TrackEncoder, TrackInput, TrackParams};
use crate::utils::error::{RecorderError, RecorderResult};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

/// Builds the codec for one configured track
pub type CodecFactory =
    Arc<dyn Fn(&str, &TrackParams) -> RecorderResult<Box<dyn MediaCodec>> + Send + Sync>;

/// Default factory: the built-in codec for each media kind
pub fn default_codec_factory() -> CodecFactory {
    Arc::new(|_name: &str, params: &TrackParams| params.build_codec())
}

/// Broadcasts track transitions, then forwards them to the frame sources
struct EventRelay {
    session_id: Uuid,
    events: broadcast::Sender<RecordingEvent>,
    inner: Arc<dyn LifecycleListener>,
}

impl LifecycleListener for EventRelay {
    fn on_ready(&self, input: &TrackInput) {
        let _ = self.events.send(RecordingEvent::TrackReady {
            session_id: self.session_id,
            track: input.name().to_string(),
            kind: input.kind(),
        });
        self.inner.on_ready(input);
    }

    fn on_stopped(&self, input: &TrackInput) {
        self.inner.on_stopped(input);

        let failure = input.failure();
        if let Some(reason) = &failure {
            let _ = self.events.send(RecordingEvent::Error {
                session_id: Some(self.session_id),
                message: format!("track {} failed: {reason}", input.name()),
            });
        }
        let _ = self.events.send(RecordingEvent::TrackStopped {
            session_id: self.session_id,
            track: input.name().to_string(),
            failure,
        });
    }
}

/// An active recording
pub struct RecordingSession {
    info: SessionInfo,
    writer: Arc<ContainerWriter>,
    tracks: Vec<TrackEncoder>,
    events: broadcast::Sender<RecordingEvent>,
}

impl RecordingSession {
    /// Create the container and tracks and ask every track to start.
    ///
    /// Returns once the workers are spawned; codecs start in the background.
    pub(crate) fn start(
        config: &Config,
        codecs: &CodecFactory,
        listener: Arc<dyn LifecycleListener>,
        events: broadcast::Sender<RecordingEvent>,
    ) -> RecorderResult<Self> {
        let id = Uuid::new_v4();
        let started_at = Utc::now();

        let track_params = config.track_params();
        if track_params.is_empty() {
            return Err(RecorderError::Configuration(
                "no tracks enabled".to_string(),
            ));
        }

        std::fs::create_dir_all(&config.recording.output_dir)?;
        let output_path = unused_path(config.output_path(started_at));
        let sink = FileSink::create(&output_path)?;
        let writer = Arc::new(ContainerWriter::new(id.to_string(), Box::new(sink)));

        let relay: Arc<dyn LifecycleListener> = Arc::new(EventRelay {
            session_id: id,
            events: events.clone(),
            inner: listener,
        });

        let mut tracks = Vec::with_capacity(track_params.len());
        for (name, params) in &track_params {
            let configured = codecs(name.as_str(), params).and_then(|codec| {
                TrackEncoder::with_codec(name.as_str(), codec, writer.clone(), relay.clone())
            });
            match configured {
                Ok(track) => tracks.push(track),
                Err(e) => {
                    tracing::error!(track = %name, error = %e, "Failed to configure track");
                    if let Err(abort_err) = writer.abort() {
                        tracing::warn!(error = %abort_err, "Failed to discard container");
                    }
                    return Err(e);
                }
            }
        }

        let info = SessionInfo {
            id,
            started_at,
            output_path: output_path.clone(),
            tracks: tracks.iter().map(|t| t.name().to_string()).collect(),
        };

        writer.set_close_hook({
            let events = events.clone();
            move |summary: &ContainerSummary| {
                let event = match summary.phase {
                    WriterPhase::Closed => {
                        tracing::info!(
                            session = %id,
                            path = %output_path.display(),
                            samples = summary.index.total_samples,
                            "Recording finalized"
                        );
                        RecordingEvent::Finalized {
                            session_id: id,
                            output_path: output_path.clone(),
                            index: summary.index.clone(),
                        }
                    }
                    _ => {
                        tracing::warn!(session = %id, "Recording aborted");
                        RecordingEvent::Aborted { session_id: id }
                    }
                };
                let _ = events.send(event);
            }
        });

        let session = Self {
            info,
            writer,
            tracks,
            events,
        };

        // Announced first so no track event precedes it
        tracing::info!(
            session = %id,
            path = %session.info.output_path.display(),
            tracks = ?session.info.tracks,
            "Recording started"
        );
        let _ = session
            .events
            .send(RecordingEvent::Started(session.info.clone()));

        for track in &session.tracks {
            if let Err(e) = track.request_start() {
                tracing::error!(track = %track.name(), error = %e, "Failed to start track");
                session.request_stop_all();
                return Err(e);
            }
        }
        Ok(session)
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn writer(&self) -> &Arc<ContainerWriter> {
        &self.writer
    }

    pub fn tracks(&self) -> &[TrackEncoder] {
        &self.tracks
    }

    fn request_stop_all(&self) {
        for track in &self.tracks {
            if let Err(e) = track.request_stop() {
                tracing::warn!(track = %track.name(), error = %e, "Stop request failed");
            }
        }
    }

    /// Ask every track to drain; returns without waiting.
    pub(crate) fn stop(self, stop_timeout: Option<Duration>) -> FinalizeHandle {
        tracing::info!(session = %self.info.id, "Stopping recording");
        let _ = self.events.send(RecordingEvent::Stopping {
            session_id: self.info.id,
        });
        self.request_stop_all();

        if let Some(timeout) = stop_timeout {
            spawn_watchdog(self.writer.clone(), self.tracks.clone(), timeout);
        }

        FinalizeHandle {
            phase: self.writer.subscribe(),
            info: self.info,
            writer: self.writer,
            tracks: self.tracks,
        }
    }
}

fn is_taken(path: &Path) -> bool {
    path.exists() || part_path(path).exists()
}

/// `path`, or `path` with a `-N` suffix if that name is already in use
fn unused_path(path: PathBuf) -> PathBuf {
    if !is_taken(&path) {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut n = 1;
    loop {
        let candidate = path.with_file_name(format!("{stem}-{n}.{CONTAINER_EXTENSION}"));
        if !is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Force-fail tracks that have not stopped once `timeout` has elapsed.
///
/// Tracks the container is still waiting on go first; running tracks get one
/// more `timeout` to drain once the container can open.
fn spawn_watchdog(writer: Arc<ContainerWriter>, tracks: Vec<TrackEncoder>, timeout: Duration) {
    let spawned = std::thread::Builder::new()
        .name(format!("stop-watchdog-{}", writer.label()))
        .spawn(move || {
            let reason = format!("did not stop within {} ms", timeout.as_millis());
            for stuck_only in [true, false] {
                if writer.wait_closed(timeout) {
                    return;
                }
                for track in tracks
                    .iter()
                    .filter(|t| t.state().is_live() && !(stuck_only && t.is_ready()))
                {
                    tracing::warn!(
                        track = %track.name(),
                        state = %track.state(),
                        timeout_ms = timeout.as_millis() as u64,
                        "Track did not stop in time"
                    );
                    track.force_fail(reason.clone());
                }
            }
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "Failed to spawn stop watchdog");
    }
}

/// Observes the finalization of a stopped session
pub struct FinalizeHandle {
    info: SessionInfo,
    writer: Arc<ContainerWriter>,
    tracks: Vec<TrackEncoder>,
    phase: watch::Receiver<WriterPhase>,
}

impl FinalizeHandle {
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn output_path(&self) -> &Path {
        &self.info.output_path
    }

    pub fn is_finalized(&self) -> bool {
        self.writer.phase().is_terminal()
    }

    /// Wait until the container is closed or aborted
    pub async fn finalized(mut self) -> ContainerSummary {
        loop {
            if self.phase.borrow_and_update().is_terminal() {
                break;
            }
            if self.phase.changed().await.is_err() {
                break;
            }
        }
        self.finish()
    }

    /// Blocking variant of [`finalized`](Self::finalized); `None` on timeout
    pub fn wait(self, timeout: Duration) -> Option<ContainerSummary> {
        if !self.writer.wait_closed(timeout) {
            return None;
        }
        Some(self.finish())
    }

    fn finish(self) -> ContainerSummary {
        for track in &self.tracks {
            if let Err(e) = track.release() {
                tracing::debug!(track = %track.name(), error = %e, "Track not released");
            }
        }
        self.writer.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unused_path_skips_taken_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording-2024-01-01-00-00-00.avmx");
        assert_eq!(unused_path(path.clone()), path);

        std::fs::write(part_path(&path), b"").unwrap();
        let second = unused_path(path.clone());
        assert_eq!(
            second,
            dir.path().join("recording-2024-01-01-00-00-00-1.avmx")
        );

        std::fs::write(&second, b"").unwrap();
        assert_eq!(
            unused_path(path),
            dir.path().join("recording-2024-01-01-00-00-00-2.avmx")
        );
    }
}
