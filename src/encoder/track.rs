//! Track encoder
//!
//! One encoder per track, each with its own worker thread. Control calls
//! (`request_start`, `submit_frame`, `request_stop`) only flip state and queue
//! commands; codec startup, encoding and draining all happen on the worker.

use super::codec::{MediaCodec, TrackParams};
use super::listener::LifecycleListener;
use super::state::TrackState;
use crate::capture::traits::RawFrame;
use crate::container::types::{EncodedSample, MediaKind, TrackDescriptor, TrackHandle};
use crate::container::writer::{ContainerWriter, WriterPhase};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// Samples a track may hold while waiting for the container to open
const MAX_PENDING_SAMPLES: usize = 8192;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Outcome of [`TrackEncoder::request_start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStatus {
    /// Start accepted; the container is not accepting this track's samples yet
    Queued,
    /// Track is running and the container is open
    Started,
}

enum TrackCommand {
    Frame(RawFrame),
    Stop,
}

struct TrackStatus {
    state: TrackState,
    failure: Option<String>,
    stop_reported: bool,
}

struct Launch {
    codec: Box<dyn MediaCodec>,
    commands: mpsc::UnboundedReceiver<TrackCommand>,
}

struct TrackShared {
    /// Unique per process; handles only identify a track within its container
    id: u64,
    name: String,
    kind: MediaKind,
    handle: TrackHandle,
    writer: Arc<ContainerWriter>,
    listener: Arc<dyn LifecycleListener>,
    status: Mutex<TrackStatus>,
    commands: mpsc::UnboundedSender<TrackCommand>,
    launch: Mutex<Option<Launch>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Format accepted by the container
    ready: AtomicBool,
    frames_accepted: AtomicU64,
    frames_dropped: AtomicU64,
}

impl TrackShared {
    fn state(&self) -> TrackState {
        self.status.lock().state
    }

    fn input(self: &Arc<Self>) -> TrackInput {
        TrackInput {
            id: self.id,
            kind: self.kind,
            handle: self.handle,
            name: self.name.clone(),
            shared: Arc::downgrade(self),
        }
    }

    fn spawn_worker(self: &Arc<Self>) -> RecorderResult<()> {
        let Some(launch) = self.launch.lock().take() else {
            return Ok(());
        };

        let shared = self.clone();
        let handle = std::thread::Builder::new()
            .name(format!("{}-encoder-{}", self.kind, self.handle.index()))
            .spawn(move || {
                Worker::new(shared, launch.codec).run(launch.commands);
            })?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Move to DRAINING unless already there; false once the track has stopped
    fn begin_drain(&self) -> bool {
        let mut status = self.status.lock();
        if status.state == TrackState::Draining {
            return true;
        }
        match status.state.transition(TrackState::Draining) {
            Ok(next) => {
                status.state = next;
                true
            }
            Err(_) => false,
        }
    }

    /// Enter STOPPED and notify the writer and listener, at most once per track
    fn report_stopped(self: &Arc<Self>, failure: Option<String>) {
        {
            let mut status = self.status.lock();
            if status.stop_reported {
                return;
            }
            let next = match &failure {
                Some(_) => status.state.fail(),
                None => status.state.transition(TrackState::Stopped),
            };
            status.state = next.unwrap_or_else(|e| {
                tracing::warn!(track = %self.name, error = %e, "Forcing track to stopped");
                TrackState::Stopped
            });
            status.failure = failure.clone();
            status.stop_reported = true;
        }

        let result = match failure {
            Some(reason) => self.writer.on_track_failed(self.handle, reason),
            None => self.writer.on_track_finished(self.handle),
        };
        if let Err(e) = result {
            tracing::error!(track = %self.name, error = %e, "Container rejected stop notification");
        }

        tracing::info!(
            track = %self.name,
            accepted = self.frames_accepted.load(Ordering::Relaxed),
            dropped = self.frames_dropped.load(Ordering::Relaxed),
            "Track stopped"
        );
        self.listener.on_stopped(&self.input());
    }
}

/// Encoder for one media track
#[derive(Clone)]
pub struct TrackEncoder {
    shared: Arc<TrackShared>,
}

impl std::fmt::Debug for TrackEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackEncoder")
            .field("name", &self.shared.name)
            .field("handle", &self.shared.handle)
            .field("state", &self.state())
            .finish()
    }
}

impl TrackEncoder {
    /// Validate `params`, build the matching codec and register with `writer`
    pub fn configure(
        name: impl Into<String>,
        params: &TrackParams,
        writer: Arc<ContainerWriter>,
        listener: Arc<dyn LifecycleListener>,
    ) -> RecorderResult<Self> {
        let codec = params.build_codec()?;
        Self::with_codec(name, codec, writer, listener)
    }

    /// Register a track driven by a custom codec strategy
    pub fn with_codec(
        name: impl Into<String>,
        codec: Box<dyn MediaCodec>,
        writer: Arc<ContainerWriter>,
        listener: Arc<dyn LifecycleListener>,
    ) -> RecorderResult<Self> {
        let name = name.into();
        let kind = codec.kind();
        let handle = writer.register_track(TrackDescriptor::new(kind, name.clone()))?;
        let (tx, rx) = mpsc::unbounded_channel();

        Ok(Self {
            shared: Arc::new(TrackShared {
                id: NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed),
                name,
                kind,
                handle,
                writer,
                listener,
                status: Mutex::new(TrackStatus {
                    state: TrackState::Preparing,
                    failure: None,
                    stop_reported: false,
                }),
                commands: tx,
                launch: Mutex::new(Some(Launch {
                    codec,
                    commands: rx,
                })),
                worker: Mutex::new(None),
                ready: AtomicBool::new(false),
                frames_accepted: AtomicU64::new(0),
                frames_dropped: AtomicU64::new(0),
            }),
        })
    }

    /// Start the track's worker; returns without waiting for the codec
    pub fn request_start(&self) -> RecorderResult<StartStatus> {
        match self.state() {
            TrackState::Preparing => {
                self.shared.spawn_worker()?;
                Ok(StartStatus::Queued)
            }
            TrackState::Running if self.shared.writer.is_open() => Ok(StartStatus::Started),
            TrackState::Running => Ok(StartStatus::Queued),
            state => Err(RecorderError::Lifecycle(format!(
                "cannot start track {} that is {state}",
                self.shared.name
            ))),
        }
    }

    /// Queue a raw frame; frames outside RUNNING are dropped
    pub fn submit_frame(&self, frame: RawFrame) -> bool {
        let status = self.shared.status.lock();
        if status.state != TrackState::Running
            || self.shared.commands.send(TrackCommand::Frame(frame)).is_err()
        {
            self.shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.shared.frames_accepted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Ask the track to drain and stop; returns immediately
    pub fn request_stop(&self) -> RecorderResult<()> {
        {
            let mut status = self.shared.status.lock();
            match status.state {
                TrackState::Preparing | TrackState::Running => {
                    status.state = status.state.transition(TrackState::Draining)?;
                }
                _ => return Ok(()),
            }
            let _ = self.shared.commands.send(TrackCommand::Stop);
        }
        tracing::debug!(track = %self.shared.name, "Stop requested");

        // A track stopped before it was started still drains on its own worker
        if let Err(e) = self.shared.spawn_worker() {
            self.shared.report_stopped(Some(e.to_string()));
            return Err(e);
        }
        Ok(())
    }

    /// Fail the track immediately, e.g. from a stop watchdog
    pub fn force_fail(&self, reason: impl Into<String>) {
        self.shared.report_stopped(Some(reason.into()));
        let _ = self.shared.commands.send(TrackCommand::Stop);
    }

    /// STOPPED -> RELEASED; detaches the finished worker
    pub fn release(&self) -> RecorderResult<()> {
        {
            let mut status = self.shared.status.lock();
            status.state = status.state.transition(TrackState::Released)?;
        }
        self.shared.worker.lock().take();
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn kind(&self) -> MediaKind {
        self.shared.kind
    }

    pub fn handle(&self) -> TrackHandle {
        self.shared.handle
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> TrackState {
        self.shared.state()
    }

    pub fn failure(&self) -> Option<String> {
        self.shared.status.lock().failure.clone()
    }

    /// Whether the container accepted this track's format
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    pub fn is_failed(&self) -> bool {
        self.shared.status.lock().failure.is_some()
    }

    pub fn frames_accepted(&self) -> u64 {
        self.shared.frames_accepted.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.shared.frames_dropped.load(Ordering::Relaxed)
    }

    /// Non-owning input handle for frame sources
    pub fn input(&self) -> TrackInput {
        self.shared.input()
    }
}

/// Non-owning handle a frame source uses to push frames into a track
#[derive(Clone)]
pub struct TrackInput {
    id: u64,
    kind: MediaKind,
    handle: TrackHandle,
    name: String,
    shared: Weak<TrackShared>,
}

impl std::fmt::Debug for TrackInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackInput")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("handle", &self.handle)
            .finish()
    }
}

impl TrackInput {
    /// Identity of the track across all containers
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn handle(&self) -> TrackHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Failure reason of the track, if it stopped through a fault
    pub fn failure(&self) -> Option<String> {
        self.shared
            .upgrade()
            .and_then(|shared| shared.status.lock().failure.clone())
    }

    /// Push a frame; false if the track is gone or no longer running
    pub fn submit_frame(&self, frame: RawFrame) -> bool {
        match self.shared.upgrade() {
            Some(shared) => TrackEncoder { shared }.submit_frame(frame),
            None => false,
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.state() == TrackState::Running)
    }
}

/// State owned by a track's worker thread
struct Worker {
    shared: Arc<TrackShared>,
    codec: Box<dyn MediaCodec>,
    pending: VecDeque<EncodedSample>,
    codec_started: bool,
    format_reported: bool,
    last_pts_us: Option<i64>,
}

impl Worker {
    fn new(shared: Arc<TrackShared>, codec: Box<dyn MediaCodec>) -> Self {
        Self {
            shared,
            codec,
            pending: VecDeque::new(),
            codec_started: false,
            format_reported: false,
            last_pts_us: None,
        }
    }

    fn run(mut self, mut commands: mpsc::UnboundedReceiver<TrackCommand>) {
        tracing::debug!(track = %self.shared.name, "Encoder worker started");
        if let Err(e) = self.run_until_stopped(&mut commands) {
            tracing::error!(track = %self.shared.name, error = %e, "Track encoder failed");
            self.shared.report_stopped(Some(e.to_string()));
        }
    }

    fn run_until_stopped(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<TrackCommand>,
    ) -> RecorderResult<()> {
        if self.shared.state() == TrackState::Preparing {
            let format = self.codec.start()?;
            self.codec_started = true;

            // Status stays locked so a concurrent stop either precedes the
            // format report or sees RUNNING
            let mut status = self.shared.status.lock();
            if status.state == TrackState::Preparing {
                self.shared
                    .writer
                    .on_track_format_ready(self.shared.handle, format)?;
                self.format_reported = true;
                self.shared.ready.store(true, Ordering::SeqCst);
                status.state = status.state.transition(TrackState::Running)?;
                drop(status);

                tracing::info!(track = %self.shared.name, "Track running");
                self.shared.listener.on_ready(&self.shared.input());
            } else {
                tracing::debug!(
                    track = %self.shared.name,
                    state = %status.state,
                    "Stopped during startup, format not reported"
                );
            }
        }

        while let Some(command) = commands.blocking_recv() {
            match command {
                TrackCommand::Frame(frame) => self.encode(frame)?,
                TrackCommand::Stop => break,
            }
        }
        self.drain()
    }

    fn encode(&mut self, frame: RawFrame) -> RecorderResult<()> {
        let mut out = Vec::new();
        self.codec.encode(frame, &mut out)?;
        for sample in out {
            self.queue(sample)?;
        }

        match self.shared.writer.phase() {
            WriterPhase::Open => self.flush_pending(),
            // Another track is not ready yet; keep samples until it is
            WriterPhase::Pending => Ok(()),
            phase => Err(RecorderError::Lifecycle(format!(
                "container is {phase:?}"
            ))),
        }
    }

    fn queue(&mut self, sample: EncodedSample) -> RecorderResult<()> {
        if self.pending.len() >= MAX_PENDING_SAMPLES {
            return Err(RecorderError::EncoderFault(format!(
                "container did not open before {MAX_PENDING_SAMPLES} samples were queued"
            )));
        }
        self.pending.push_back(sample);
        Ok(())
    }

    fn flush_pending(&mut self) -> RecorderResult<()> {
        while let Some(sample) = self.pending.front() {
            self.shared.writer.write_sample(self.shared.handle, sample)?;
            self.last_pts_us = Some(sample.pts_us);
            self.pending.pop_front();
        }
        Ok(())
    }

    fn drain(&mut self) -> RecorderResult<()> {
        if !self.shared.begin_drain() {
            // Already stopped through a fault
            return Ok(());
        }
        tracing::debug!(track = %self.shared.name, queued = self.pending.len(), "Draining track");

        if !self.format_reported {
            // Not part of the container: the codec is flushed but nothing,
            // end of stream included, is written
            if self.codec_started {
                let mut discarded = Vec::new();
                self.codec.flush(&mut discarded)?;
                tracing::debug!(
                    track = %self.shared.name,
                    discarded = discarded.len() + self.pending.len(),
                    "Track never became ready, output discarded"
                );
                self.pending.clear();
            }
        } else {
            let mut out = Vec::new();
            self.codec.flush(&mut out)?;
            for sample in out {
                self.queue(sample)?;
            }

            match self.shared.writer.wait_until_open() {
                WriterPhase::Open => {
                    self.flush_pending()?;
                    let eos = EncodedSample::end_of_stream(self.last_pts_us.unwrap_or(0));
                    self.shared.writer.write_sample(self.shared.handle, &eos)?;
                }
                phase => {
                    return Err(RecorderError::Lifecycle(format!(
                        "container is {phase:?}, {} samples discarded",
                        self.pending.len()
                    )));
                }
            }
        }

        self.shared.report_stopped(None);
        Ok(())
    }
}
