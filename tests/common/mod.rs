#![allow(dead_code)]

use avrecorder::capture::RawFrame;
use avrecorder::container::{EncodedSample, MediaKind, TrackFormat};
use avrecorder::encoder::{
    AudioParams, LifecycleListener, MediaCodec, PcmAudioCodec, RleVideoCodec, TrackInput,
    VideoParams,
};
use avrecorder::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub fn small_audio() -> AudioParams {
    AudioParams {
        sample_rate: 8_000,
        channels: 1,
        bit_rate: 16_000,
        samples_per_frame: 64,
    }
}

pub fn small_video() -> VideoParams {
    VideoParams {
        width: 16,
        height: 16,
        frame_rate: 25,
        latency_frames: 0,
        ..VideoParams::default()
    }
}

/// 64 mono samples, one encoded frame with `small_audio`
pub fn pcm(pts_us: i64) -> RawFrame {
    RawFrame::pcm(pts_us, vec![0.1; 64])
}

pub fn picture(pts_us: i64, fill: u8) -> RawFrame {
    RawFrame::picture(pts_us, 16, 16, vec![fill; 16 * 16 * 4])
}

/// Wraps a codec and delays its startup
pub struct SlowStart {
    pub inner: Box<dyn MediaCodec>,
    pub delay: Duration,
}

impl MediaCodec for SlowStart {
    fn kind(&self) -> MediaKind {
        self.inner.kind()
    }

    fn start(&mut self) -> RecorderResult<TrackFormat> {
        std::thread::sleep(self.delay);
        self.inner.start()
    }

    fn encode(&mut self, frame: RawFrame, out: &mut Vec<EncodedSample>) -> RecorderResult<()> {
        self.inner.encode(frame, out)
    }

    fn flush(&mut self, out: &mut Vec<EncodedSample>) -> RecorderResult<()> {
        self.inner.flush(out)
    }
}

/// Wraps a codec and fails on the n-th frame (1-based)
pub struct FaultOnFrame {
    pub inner: Box<dyn MediaCodec>,
    pub frame: usize,
    pub seen: usize,
}

impl MediaCodec for FaultOnFrame {
    fn kind(&self) -> MediaKind {
        self.inner.kind()
    }

    fn start(&mut self) -> RecorderResult<TrackFormat> {
        self.inner.start()
    }

    fn encode(&mut self, frame: RawFrame, out: &mut Vec<EncodedSample>) -> RecorderResult<()> {
        self.seen += 1;
        if self.seen == self.frame {
            return Err(RecorderError::EncoderFault(
                "hardware encoder went away".to_string(),
            ));
        }
        self.inner.encode(frame, out)
    }

    fn flush(&mut self, out: &mut Vec<EncodedSample>) -> RecorderResult<()> {
        self.inner.flush(out)
    }
}

pub fn slow_audio(delay: Duration) -> Box<dyn MediaCodec> {
    Box::new(SlowStart {
        inner: Box::new(PcmAudioCodec::new(small_audio())),
        delay,
    })
}

pub fn slow_video(delay: Duration) -> Box<dyn MediaCodec> {
    Box::new(SlowStart {
        inner: Box::new(RleVideoCodec::new(small_video())),
        delay,
    })
}

/// Records when each track became ready and stopped
#[derive(Default)]
pub struct TimingListener {
    pub ready: Mutex<Vec<(MediaKind, Instant)>>,
    pub stopped: Mutex<Vec<(MediaKind, Option<String>)>>,
}

impl TimingListener {
    pub fn ready_at(&self, kind: MediaKind) -> Option<Instant> {
        self.ready
            .lock()
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, at)| *at)
    }
}

impl LifecycleListener for TimingListener {
    fn on_ready(&self, input: &TrackInput) {
        self.ready.lock().push((input.kind(), Instant::now()));
    }

    fn on_stopped(&self, input: &TrackInput) {
        self.stopped.lock().push((input.kind(), input.failure()));
    }
}

pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}
