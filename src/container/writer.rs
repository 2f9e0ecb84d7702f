//! Container writer
//!
//! Shared by every track encoder of a session. The writer opens its sink once
//! every registered track has reported a format and closes it once every
//! track has finished or failed. Both transitions happen exactly once and are
//! driven by the track notifications, never by the session directly.

use super::format::{ContainerIndex, HeaderEntry, TrackIndex, FORMAT_VERSION, RECORD_HEADER_LEN};
use super::sink::ContainerSink;
use super::types::{
    EncodedSample, TrackDescriptor, TrackFormat, TrackHandle, TrackSet, MAX_TRACKS,
};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Lifecycle phase of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterPhase {
    /// Waiting for track formats
    Pending,
    /// Header written, accepting samples
    Open,
    /// Trailer written, output is valid
    Closed,
    /// Output discarded
    Aborted,
}

impl WriterPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WriterPhase::Closed | WriterPhase::Aborted)
    }
}

/// Snapshot of a container's bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub label: String,
    pub phase: WriterPhase,
    pub index: ContainerIndex,
}

impl ContainerSummary {
    pub fn failed_tracks(&self) -> impl Iterator<Item = &TrackIndex> {
        self.index.tracks.iter().filter(|t| t.failed)
    }
}

type CloseHook = Box<dyn Fn(&ContainerSummary) + Send + Sync>;

struct TrackSlot {
    descriptor: TrackDescriptor,
    format: Option<TrackFormat>,
    first_pts_us: Option<i64>,
    last_pts_us: Option<i64>,
    samples: u64,
    bytes: u64,
    key_offsets: Vec<u64>,
    end_of_stream: bool,
    failure: Option<String>,
}

impl TrackSlot {
    fn new(descriptor: TrackDescriptor) -> Self {
        Self {
            descriptor,
            format: None,
            first_pts_us: None,
            last_pts_us: None,
            samples: 0,
            bytes: 0,
            key_offsets: Vec::new(),
            end_of_stream: false,
            failure: None,
        }
    }
}

struct WriterState {
    phase: WriterPhase,
    slots: Vec<TrackSlot>,
    registered: TrackSet,
    ready: TrackSet,
    finished: TrackSet,
    failed: TrackSet,
    in_flight: usize,
    close_pending: bool,
    samples_written: u64,
    bytes_written: u64,
    /// Phase change not yet published to observers
    transition: Option<WriterPhase>,
}

impl WriterState {
    fn slot(&self, handle: TrackHandle) -> RecorderResult<&TrackSlot> {
        self.slots
            .get(handle.index())
            .ok_or_else(|| RecorderError::Lifecycle(format!("unknown track {handle}")))
    }

    fn slot_mut(&mut self, handle: TrackHandle) -> RecorderResult<&mut TrackSlot> {
        self.slots
            .get_mut(handle.index())
            .ok_or_else(|| RecorderError::Lifecycle(format!("unknown track {handle}")))
    }

    fn open_ready(&self) -> bool {
        self.phase == WriterPhase::Pending
            && !self.ready.is_empty()
            && self.ready.union(&self.finished) == self.registered
    }

    fn all_finished(&self) -> bool {
        !self.registered.is_empty() && self.finished == self.registered
    }

    fn index(&self) -> ContainerIndex {
        let tracks = self
            .slots
            .iter()
            .enumerate()
            .map(|(i, slot)| TrackIndex {
                track: i,
                kind: slot.descriptor.kind,
                name: slot.descriptor.name.clone(),
                samples: slot.samples,
                bytes: slot.bytes,
                first_pts_us: slot.first_pts_us,
                last_pts_us: slot.last_pts_us,
                key_offsets: slot.key_offsets.clone(),
                end_of_stream: slot.end_of_stream,
                failed: slot.failure.is_some(),
                failure: slot.failure.clone(),
            })
            .collect();

        ContainerIndex {
            version: FORMAT_VERSION,
            tracks,
            total_samples: self.samples_written,
            total_bytes: self.bytes_written,
        }
    }
}

/// Multi-track container writer
pub struct ContainerWriter {
    label: String,
    state: Mutex<WriterState>,
    sink: Mutex<Box<dyn ContainerSink>>,
    changed: Condvar,
    phase_tx: watch::Sender<WriterPhase>,
    close_hook: Mutex<Option<CloseHook>>,
}

impl ContainerWriter {
    pub fn new(label: impl Into<String>, sink: Box<dyn ContainerSink>) -> Self {
        let (phase_tx, _) = watch::channel(WriterPhase::Pending);
        Self {
            label: label.into(),
            state: Mutex::new(WriterState {
                phase: WriterPhase::Pending,
                slots: Vec::new(),
                registered: TrackSet::default(),
                ready: TrackSet::default(),
                finished: TrackSet::default(),
                failed: TrackSet::default(),
                in_flight: 0,
                close_pending: false,
                samples_written: 0,
                bytes_written: 0,
                transition: None,
            }),
            sink: Mutex::new(sink),
            changed: Condvar::new(),
            phase_tx,
            close_hook: Mutex::new(None),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Called once with the final summary when the container closes or aborts
    pub fn set_close_hook(&self, hook: impl Fn(&ContainerSummary) + Send + Sync + 'static) {
        *self.close_hook.lock() = Some(Box::new(hook));
    }

    /// Register a track; only allowed before the container opens
    pub fn register_track(&self, descriptor: TrackDescriptor) -> RecorderResult<TrackHandle> {
        let mut state = self.state.lock();
        if state.phase != WriterPhase::Pending {
            return Err(RecorderError::Lifecycle(format!(
                "cannot register {} track, container is {:?}",
                descriptor.kind, state.phase
            )));
        }
        if state.slots.len() >= MAX_TRACKS {
            return Err(RecorderError::Configuration(format!(
                "a container holds at most {MAX_TRACKS} tracks"
            )));
        }

        let handle = TrackHandle(state.slots.len());
        tracing::debug!(container = %self.label, track = %handle, kind = %descriptor.kind, "Track registered");
        state.slots.push(TrackSlot::new(descriptor));
        state.registered.insert(handle);
        Ok(handle)
    }

    /// Record a track's format; opens the container when it completes the readiness set.
    ///
    /// Returns whether this call opened the container.
    pub fn on_track_format_ready(
        &self,
        handle: TrackHandle,
        format: TrackFormat,
    ) -> RecorderResult<bool> {
        let mut state = self.state.lock();
        let slot = state.slot(handle)?;
        if state.ready.contains(handle) {
            return Err(RecorderError::Protocol(format!(
                "track {handle} reported its format twice"
            )));
        }
        if state.finished.contains(handle) {
            return Err(RecorderError::Protocol(format!(
                "track {handle} reported its format after finishing"
            )));
        }
        if slot.descriptor.kind != format.kind() {
            return Err(RecorderError::Configuration(format!(
                "track {handle} is {} but reported a {} format",
                slot.descriptor.kind,
                format.kind()
            )));
        }
        if state.phase != WriterPhase::Pending {
            return Err(RecorderError::Lifecycle(format!(
                "track {handle} reported its format while container is {:?}",
                state.phase
            )));
        }

        state.slot_mut(handle)?.format = Some(format);
        state.ready.insert(handle);
        tracing::debug!(
            container = %self.label,
            track = %handle,
            ready = state.ready.len(),
            registered = state.registered.len(),
            "Track format ready"
        );

        let result = self.try_open(&mut state);
        self.release(state);
        result
    }

    /// Write one encoded sample of an open track.
    ///
    /// The bookkeeping lock is not held while the sink performs the write.
    pub fn write_sample(&self, handle: TrackHandle, sample: &EncodedSample) -> RecorderResult<()> {
        {
            let mut state = self.state.lock();
            if state.phase != WriterPhase::Open {
                return Err(RecorderError::Lifecycle(format!(
                    "cannot write to track {handle}, container is {:?}",
                    state.phase
                )));
            }
            if !state.ready.contains(handle) {
                return Err(RecorderError::Lifecycle(format!(
                    "track {handle} has not reported its format"
                )));
            }
            if state.finished.contains(handle) {
                return Err(RecorderError::Lifecycle(format!(
                    "track {handle} already finished"
                )));
            }

            let slot = state.slot_mut(handle)?;
            if slot.end_of_stream {
                return Err(RecorderError::Lifecycle(format!(
                    "track {handle} already reached end of stream"
                )));
            }
            if let Some(last) = slot.last_pts_us {
                if sample.pts_us < last {
                    return Err(RecorderError::Ordering {
                        track: handle.index(),
                        pts_us: sample.pts_us,
                        last_pts_us: last,
                    });
                }
            }

            if sample.is_end_of_stream() {
                slot.end_of_stream = true;
                tracing::debug!(container = %self.label, track = %handle, "End of stream");
                return Ok(());
            }

            slot.last_pts_us = Some(sample.pts_us);
            if slot.first_pts_us.is_none() {
                slot.first_pts_us = Some(sample.pts_us);
            }
            state.in_flight += 1;
        }

        let result = self.sink.lock().write_sample(handle, sample);

        let mut state = self.state.lock();
        state.in_flight -= 1;
        if let Ok(offset) = result {
            let size = sample.data.len() as u64;
            state.samples_written += 1;
            state.bytes_written += RECORD_HEADER_LEN + size;
            let slot = state.slot_mut(handle)?;
            slot.samples += 1;
            slot.bytes += size;
            if sample.is_key() {
                slot.key_offsets.push(offset);
            }
        }
        if state.close_pending && state.in_flight == 0 {
            self.close_locked(&mut state);
        }
        self.release(state);

        result.map(|_| ())
    }

    /// Mark a track as cleanly finished
    pub fn on_track_finished(&self, handle: TrackHandle) -> RecorderResult<()> {
        self.finish(handle, None)
    }

    /// Mark a track as failed; counts as finished for closing purposes
    pub fn on_track_failed(&self, handle: TrackHandle, reason: impl Into<String>) -> RecorderResult<()> {
        self.finish(handle, Some(reason.into()))
    }

    /// Discard a container that never opened, e.g. when session setup fails
    pub fn abort(&self) -> RecorderResult<()> {
        let mut state = self.state.lock();
        match state.phase {
            WriterPhase::Pending => {
                self.abort_locked(&mut state);
                self.release(state);
                Ok(())
            }
            WriterPhase::Aborted => Ok(()),
            phase => Err(RecorderError::Lifecycle(format!(
                "cannot abort a container that is {phase:?}"
            ))),
        }
    }

    pub fn phase(&self) -> WriterPhase {
        self.state.lock().phase
    }

    pub fn is_open(&self) -> bool {
        self.phase() == WriterPhase::Open
    }

    pub fn track_count(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn summary(&self) -> ContainerSummary {
        let state = self.state.lock();
        ContainerSummary {
            label: self.label.clone(),
            phase: state.phase,
            index: state.index(),
        }
    }

    /// Observe phase changes
    pub fn subscribe(&self) -> watch::Receiver<WriterPhase> {
        self.phase_tx.subscribe()
    }

    /// Block until the container leaves `Pending`; returns the new phase
    pub fn wait_until_open(&self) -> WriterPhase {
        let mut state = self.state.lock();
        while state.phase == WriterPhase::Pending {
            self.changed.wait(&mut state);
        }
        state.phase
    }

    /// Block until the container is closed or aborted, or `timeout` elapses
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.phase.is_terminal() {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.phase.is_terminal()
    }

    fn finish(&self, handle: TrackHandle, failure: Option<String>) -> RecorderResult<()> {
        let mut state = self.state.lock();
        state.slot(handle)?;
        if !state.finished.insert(handle) {
            return Err(RecorderError::Protocol(format!(
                "track {handle} finished twice"
            )));
        }

        match &failure {
            Some(reason) => {
                tracing::warn!(container = %self.label, track = %handle, %reason, "Track failed");
                state.failed.insert(handle);
            }
            None => {
                tracing::debug!(container = %self.label, track = %handle, "Track finished");
            }
        }
        state.slot_mut(handle)?.failure = failure;

        let mut result = Ok(());
        if state.phase == WriterPhase::Pending {
            // A track that never became ready no longer holds back the others
            result = self.try_open(&mut state).map(|_| ());
            if state.phase == WriterPhase::Pending && state.all_finished() {
                tracing::warn!(container = %self.label, "Every track finished before any became ready");
                self.abort_locked(&mut state);
            }
        }
        if state.phase == WriterPhase::Open && state.all_finished() {
            if state.in_flight == 0 {
                self.close_locked(&mut state);
            } else {
                state.close_pending = true;
            }
        }

        self.release(state);
        result
    }

    fn try_open(&self, state: &mut WriterState) -> RecorderResult<bool> {
        if !state.open_ready() {
            return Ok(false);
        }

        let header: Vec<HeaderEntry> = state
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.format.clone().map(|format| HeaderEntry {
                    track: i,
                    name: slot.descriptor.name.clone(),
                    format,
                })
            })
            .collect();

        let mut sink = self.sink.lock();
        if let Err(e) = sink.write_header(&header) {
            tracing::error!(container = %self.label, error = %e, "Failed to write container header");
            if let Err(abort_err) = sink.abort() {
                tracing::warn!(container = %self.label, error = %abort_err, "Failed to discard output");
            }
            state.phase = WriterPhase::Aborted;
            state.transition = Some(WriterPhase::Aborted);
            return Err(e);
        }

        state.phase = WriterPhase::Open;
        state.transition = Some(WriterPhase::Open);
        tracing::info!(container = %self.label, tracks = header.len(), "Container opened");
        Ok(true)
    }

    fn close_locked(&self, state: &mut WriterState) {
        state.close_pending = false;
        let index = state.index();

        let mut sink = self.sink.lock();
        match sink.write_trailer(&index) {
            Ok(()) => {
                state.phase = WriterPhase::Closed;
                tracing::info!(
                    container = %self.label,
                    samples = index.total_samples,
                    failed = state.failed.len(),
                    "Container closed"
                );
            }
            Err(e) => {
                tracing::error!(container = %self.label, error = %e, "Failed to finalize container");
                if let Err(abort_err) = sink.abort() {
                    tracing::warn!(container = %self.label, error = %abort_err, "Failed to discard output");
                }
                state.phase = WriterPhase::Aborted;
            }
        }
        state.transition = Some(state.phase);
    }

    fn abort_locked(&self, state: &mut WriterState) {
        if let Err(e) = self.sink.lock().abort() {
            tracing::warn!(container = %self.label, error = %e, "Failed to discard output");
        }
        state.phase = WriterPhase::Aborted;
        state.transition = Some(WriterPhase::Aborted);
    }

    /// Drop the lock, then publish any phase change it recorded
    fn release(&self, mut state: MutexGuard<'_, WriterState>) {
        let Some(phase) = state.transition.take() else {
            return;
        };
        let summary = phase.is_terminal().then(|| ContainerSummary {
            label: self.label.clone(),
            phase,
            index: state.index(),
        });
        drop(state);

        self.changed.notify_all();
        self.phase_tx.send_replace(phase);
        if let Some(summary) = summary {
            if let Some(hook) = self.close_hook.lock().take() {
                hook(&summary);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::sink::MemorySink;
    use crate::container::types::{MediaKind, SampleFlags};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn audio_format() -> TrackFormat {
        TrackFormat::Audio {
            codec: "pcm_s16le".to_string(),
            sample_rate: 44_100,
            channels: 1,
            bit_rate: 64_000,
            samples_per_frame: 1024,
        }
    }

    fn video_format() -> TrackFormat {
        TrackFormat::Video {
            codec: "rle-delta".to_string(),
            width: 64,
            height: 32,
            frame_rate: 25,
            bit_rate: 12_800,
            key_frame_interval: 250,
        }
    }

    fn format_for(kind: MediaKind) -> TrackFormat {
        match kind {
            MediaKind::Audio => audio_format(),
            MediaKind::Video => video_format(),
        }
    }

    fn writer_with(kinds: &[MediaKind]) -> (ContainerWriter, MemorySink, Vec<TrackHandle>) {
        let sink = MemorySink::new();
        let writer = ContainerWriter::new("test", Box::new(sink.clone()));
        let handles = kinds
            .iter()
            .map(|kind| {
                writer
                    .register_track(TrackDescriptor::new(*kind, kind.to_string()))
                    .unwrap()
            })
            .collect();
        (writer, sink, handles)
    }

    fn sample(pts_us: i64) -> EncodedSample {
        EncodedSample::new(pts_us, SampleFlags::KEY, vec![0xab; 8])
    }

    fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_opens_once_after_all_tracks_ready_in_any_order() {
        let kinds = [MediaKind::Video, MediaKind::Audio, MediaKind::Audio];
        for order in permutations(&[0, 1, 2]) {
            let (writer, sink, handles) = writer_with(&kinds);
            for (step, &i) in order.iter().enumerate() {
                let opened = writer
                    .on_track_format_ready(handles[i], format_for(kinds[i]))
                    .unwrap();
                let last = step == order.len() - 1;
                assert_eq!(opened, last, "order {order:?} step {step}");
                assert_eq!(writer.is_open(), last);
            }
            let contents = sink.contents();
            assert_eq!(contents.header_writes, 1);
            assert_eq!(contents.header.unwrap().len(), 3);
        }
    }

    #[test]
    fn test_closes_once_after_all_tracks_finished_in_any_order() {
        for order in permutations(&[0, 1, 2]) {
            let (writer, sink, handles) =
                writer_with(&[MediaKind::Video, MediaKind::Audio, MediaKind::Audio]);
            for (i, handle) in handles.iter().enumerate() {
                let kind = if i == 0 { MediaKind::Video } else { MediaKind::Audio };
                writer.on_track_format_ready(*handle, format_for(kind)).unwrap();
            }
            for (step, &i) in order.iter().enumerate() {
                writer.on_track_finished(handles[i]).unwrap();
                let last = step == order.len() - 1;
                assert_eq!(writer.phase() == WriterPhase::Closed, last);
            }
            assert_eq!(sink.contents().trailer_writes, 1);
        }
    }

    #[test]
    fn test_register_after_open_is_rejected() {
        let (writer, _, handles) = writer_with(&[MediaKind::Audio]);
        writer.on_track_format_ready(handles[0], audio_format()).unwrap();

        let err = writer
            .register_track(TrackDescriptor::new(MediaKind::Video, "late"))
            .unwrap_err();
        assert!(matches!(err, RecorderError::Lifecycle(_)));
    }

    #[test]
    fn test_duplicate_notifications_are_protocol_errors() {
        let (writer, _, handles) = writer_with(&[MediaKind::Audio, MediaKind::Video]);
        writer.on_track_format_ready(handles[0], audio_format()).unwrap();
        let err = writer
            .on_track_format_ready(handles[0], audio_format())
            .unwrap_err();
        assert!(matches!(err, RecorderError::Protocol(_)));

        writer.on_track_format_ready(handles[1], video_format()).unwrap();
        writer.on_track_finished(handles[0]).unwrap();
        let err = writer.on_track_failed(handles[0], "again").unwrap_err();
        assert!(matches!(err, RecorderError::Protocol(_)));
    }

    #[test]
    fn test_format_kind_must_match_descriptor() {
        let (writer, _, handles) = writer_with(&[MediaKind::Audio]);
        let err = writer
            .on_track_format_ready(handles[0], video_format())
            .unwrap_err();
        assert!(matches!(err, RecorderError::Configuration(_)));
        assert_eq!(writer.phase(), WriterPhase::Pending);
    }

    #[test]
    fn test_write_requires_open_container() {
        let (writer, sink, handles) = writer_with(&[MediaKind::Audio, MediaKind::Video]);
        writer.on_track_format_ready(handles[0], audio_format()).unwrap();

        let err = writer.write_sample(handles[0], &sample(0)).unwrap_err();
        assert!(matches!(err, RecorderError::Lifecycle(_)));
        assert!(sink.contents().samples.is_empty());
    }

    #[test]
    fn test_ordering_error_is_per_track() {
        let (writer, sink, handles) = writer_with(&[MediaKind::Audio, MediaKind::Video]);
        writer.on_track_format_ready(handles[0], audio_format()).unwrap();
        writer.on_track_format_ready(handles[1], video_format()).unwrap();

        writer.write_sample(handles[0], &sample(1_000)).unwrap();
        writer.write_sample(handles[0], &sample(1_000)).unwrap();
        writer.write_sample(handles[1], &sample(40_000)).unwrap();

        let err = writer.write_sample(handles[1], &sample(20_000)).unwrap_err();
        assert!(matches!(
            err,
            RecorderError::Ordering {
                track: 1,
                pts_us: 20_000,
                last_pts_us: 40_000
            }
        ));

        // The other track is unaffected
        writer.write_sample(handles[0], &sample(500_000)).unwrap();
        let contents = sink.contents();
        assert_eq!(contents.samples_for(handles[0]).len(), 3);
        assert_eq!(contents.samples_for(handles[1]).len(), 1);
    }

    #[test]
    fn test_end_of_stream_blocks_further_samples() {
        let (writer, sink, handles) = writer_with(&[MediaKind::Audio]);
        writer.on_track_format_ready(handles[0], audio_format()).unwrap();
        writer.write_sample(handles[0], &sample(0)).unwrap();
        writer
            .write_sample(handles[0], &EncodedSample::end_of_stream(0))
            .unwrap();

        assert!(writer.write_sample(handles[0], &sample(10)).is_err());
        writer.on_track_finished(handles[0]).unwrap();

        let trailer = sink.contents().trailer.unwrap();
        assert!(trailer.tracks[0].end_of_stream);
        assert!(trailer.tracks[0].is_complete());
        assert_eq!(trailer.tracks[0].samples, 1);
    }

    #[test]
    fn test_failed_track_counts_as_finished() {
        let (writer, sink, handles) = writer_with(&[MediaKind::Audio, MediaKind::Video]);
        writer.on_track_format_ready(handles[0], audio_format()).unwrap();
        writer.on_track_format_ready(handles[1], video_format()).unwrap();
        writer.write_sample(handles[1], &sample(0)).unwrap();

        writer.on_track_failed(handles[1], "encoder fault").unwrap();
        assert!(writer.is_open());
        writer.write_sample(handles[0], &sample(0)).unwrap();
        writer.on_track_finished(handles[0]).unwrap();

        assert_eq!(writer.phase(), WriterPhase::Closed);
        let summary = writer.summary();
        let failed: Vec<_> = summary.failed_tracks().map(|t| t.track).collect();
        assert_eq!(failed, vec![1]);
        assert_eq!(sink.contents().trailer_writes, 1);
    }

    #[test]
    fn test_track_failing_before_ready_is_excluded_from_open() {
        let (writer, sink, handles) = writer_with(&[MediaKind::Audio, MediaKind::Video]);
        writer.on_track_format_ready(handles[0], audio_format()).unwrap();
        assert!(!writer.is_open());

        writer.on_track_failed(handles[1], "camera unavailable").unwrap();
        assert!(writer.is_open());
        assert_eq!(sink.contents().header.unwrap().len(), 1);

        writer.on_track_finished(handles[0]).unwrap();
        assert_eq!(writer.phase(), WriterPhase::Closed);
    }

    #[test]
    fn test_all_tracks_finishing_before_ready_aborts() {
        let (writer, sink, handles) = writer_with(&[MediaKind::Audio, MediaKind::Video]);
        writer.on_track_finished(handles[0]).unwrap();
        writer.on_track_failed(handles[1], "no camera").unwrap();

        assert_eq!(writer.phase(), WriterPhase::Aborted);
        let contents = sink.contents();
        assert!(contents.aborted);
        assert_eq!(contents.header_writes, 0);
    }

    #[test]
    fn test_close_hook_runs_once() {
        let (writer, _, handles) = writer_with(&[MediaKind::Audio]);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        writer.set_close_hook(move |summary| {
            assert_eq!(summary.phase, WriterPhase::Closed);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        writer.on_track_format_ready(handles[0], audio_format()).unwrap();
        writer.on_track_finished(handles[0]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(writer.wait_closed(Duration::from_millis(1)));
    }

    #[test]
    fn test_slow_write_does_not_block_bookkeeping() {
        let sink = MemorySink::new().with_write_delay(Duration::from_millis(600));
        let writer = Arc::new(ContainerWriter::new("slow", Box::new(sink.clone())));
        let audio = writer
            .register_track(TrackDescriptor::new(MediaKind::Audio, "audio"))
            .unwrap();
        let video = writer
            .register_track(TrackDescriptor::new(MediaKind::Video, "video"))
            .unwrap();
        writer.on_track_format_ready(audio, audio_format()).unwrap();
        writer.on_track_format_ready(video, video_format()).unwrap();

        let slow = {
            let writer = writer.clone();
            std::thread::spawn(move || writer.write_sample(video, &sample(0)))
        };
        std::thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        writer.on_track_finished(audio).unwrap();
        // Force-failing the writing track defers the close until its write lands
        writer.on_track_failed(video, "watchdog").unwrap();
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(writer.phase(), WriterPhase::Open);

        slow.join().unwrap().unwrap();
        assert_eq!(writer.phase(), WriterPhase::Closed);
        let trailer = sink.contents().trailer.unwrap();
        assert_eq!(trailer.total_samples, 1);
    }

    #[test]
    fn test_abort_only_before_open() {
        let (writer, sink, handles) = writer_with(&[MediaKind::Audio]);
        writer.abort().unwrap();
        assert!(sink.contents().aborted);
        assert!(writer
            .on_track_format_ready(handles[0], audio_format())
            .is_err());

        let (writer, _, handles) = writer_with(&[MediaKind::Audio]);
        writer.on_track_format_ready(handles[0], audio_format()).unwrap();
        assert!(writer.abort().is_err());
    }

    #[tokio::test]
    async fn test_subscribe_observes_close() {
        let (writer, _, handles) = writer_with(&[MediaKind::Video]);
        let mut phases = writer.subscribe();
        writer.on_track_format_ready(handles[0], video_format()).unwrap();
        writer.on_track_finished(handles[0]).unwrap();

        let phase = *phases.wait_for(|p| p.is_terminal()).await.unwrap();
        assert_eq!(phase, WriterPhase::Closed);
    }
}
