//! Recording coordinator
//!
//! Owns at most one active session and manages the recording lifecycle.

use super::session::{default_codec_factory, CodecFactory, FinalizeHandle, RecordingSession};
use super::state::{RecordingEvent, RecordingState, SessionInfo};
use crate::config::Config;
use crate::encoder::{LifecycleListener, NoopListener};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Starts and stops recording sessions
pub struct Recorder {
    config: Config,

    /// Receives track ready/stopped notifications, typically a `SourceHub`
    listener: Arc<dyn LifecycleListener>,

    codecs: CodecFactory,

    /// The active session, if any; stopped sessions drain on their own
    active: Mutex<Option<RecordingSession>>,

    /// Event broadcaster
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl Recorder {
    /// Create a recorder that records with `config` and reports track
    /// transitions to `listener`
    pub fn new(config: Config, listener: Arc<dyn LifecycleListener>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            config,
            listener,
            codecs: default_codec_factory(),
            active: Mutex::new(None),
            event_tx,
        }
    }

    /// Recorder without frame sources
    pub fn without_sources(config: Config) -> Self {
        Self::new(config, Arc::new(NoopListener))
    }

    /// Replace how codecs are built for each configured track
    pub fn with_codec_factory(mut self, codecs: CodecFactory) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the current recording state
    pub fn state(&self) -> RecordingState {
        if self.active.lock().is_some() {
            RecordingState::Recording
        } else {
            RecordingState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecordingState::Recording
    }

    /// Info of the active session
    pub fn session(&self) -> Option<SessionInfo> {
        self.active.lock().as_ref().map(|s| s.info().clone())
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    /// Start a new session.
    ///
    /// Fails with `AlreadyRecording` while another session is active.
    pub fn start(&self) -> RecorderResult<SessionInfo> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        let session = match RecordingSession::start(
            &self.config,
            &self.codecs,
            self.listener.clone(),
            self.event_tx.clone(),
        ) {
            Ok(session) => session,
            Err(e) => {
                let _ = self.event_tx.send(RecordingEvent::Error {
                    session_id: None,
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let info = session.info().clone();
        *active = Some(session);
        Ok(info)
    }

    /// Stop the active session.
    ///
    /// Returns immediately; `None` if nothing was recording. The session is no
    /// longer active afterwards, so a new one may start while it drains.
    pub fn stop(&self) -> Option<FinalizeHandle> {
        let session = self.active.lock().take()?;
        let timeout = self
            .config
            .recording
            .stop_timeout_ms
            .map(Duration::from_millis);
        Some(session.stop(timeout))
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(handle) = self.stop() {
            tracing::info!(
                session = %handle.info().id,
                "Recorder dropped, session left to finalize"
            );
        }
    }
}
