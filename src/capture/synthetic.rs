//! Synthetic capture sources
//!
//! A sine tone and a moving colour-bar pattern, paced in real time. They stand
//! in for a microphone and a camera in the demo binary and in tests.

use super::traits::{FrameSource, RawFrame, Resolution};
use crate::container::types::MediaKind;
use crate::encoder::{AudioParams, TrackInput, VideoParams};
use parking_lot::Mutex as ParkingMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Generator thread shared by both synthetic sources
struct Generator {
    running: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
    handle: ParkingMutex<Option<JoinHandle<()>>>,
}

impl Generator {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            frames_sent: Arc::new(AtomicU64::new(0)),
            handle: ParkingMutex::new(None),
        }
    }

    /// Spawn `produce` every `interval` until detached or the track stops
    /// accepting frames. `produce` gets the frame index.
    fn start(
        &self,
        name: &str,
        input: TrackInput,
        interval: Duration,
        origin: Instant,
        mut produce: impl FnMut(u64, i64) -> RawFrame + Send + 'static,
    ) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!(source = name, "Source already attached, ignoring");
            return;
        }

        let running = self.running.clone();
        let frames_sent = self.frames_sent.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("{name}-source"))
            .spawn(move || {
                // First pts is the time since the session clock started
                let base_us = origin.elapsed().as_micros() as i64;
                let started = Instant::now();
                let mut index = 0u64;

                while running.load(Ordering::SeqCst) {
                    let pts_us = base_us + (interval * index as u32).as_micros() as i64;
                    if input.submit_frame(produce(index, pts_us)) {
                        frames_sent.fetch_add(1, Ordering::Relaxed);
                    } else if !input.is_accepting() {
                        break;
                    }
                    index += 1;

                    let next = started + interval * index as u32;
                    if let Some(wait) = next.checked_duration_since(Instant::now()) {
                        std::thread::sleep(wait);
                    }
                }
                running.store(false, Ordering::SeqCst);
            });

        match spawned {
            Ok(handle) => *self.handle.lock() = Some(handle),
            Err(e) => {
                tracing::error!(source = name, error = %e, "Failed to spawn source thread");
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Sine tone microphone stand-in
pub struct ToneSource {
    frequency: f32,
    params: AudioParams,
    origin: Instant,
    generator: Generator,
}

impl ToneSource {
    pub fn new(frequency: f32, params: AudioParams, origin: Instant) -> Self {
        Self {
            frequency,
            params,
            origin,
            generator: Generator::new(),
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.generator.frames_sent.load(Ordering::Relaxed)
    }
}

impl FrameSource for ToneSource {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn attach(&self, input: TrackInput) {
        let frequency = self.frequency;
        let sample_rate = self.params.sample_rate as f32;
        let channels = self.params.channels as usize;
        let chunk = self.params.samples_per_frame as usize;
        let interval = Duration::from_micros(self.params.frame_duration_us() as u64);

        tracing::debug!(frequency, sample_rate, "Attaching tone source");
        self.generator
            .start("tone", input, interval, self.origin, move |index, pts_us| {
                let first = index as usize * chunk;
                let samples = (0..chunk)
                    .flat_map(|i| {
                        let t = (first + i) as f32 / sample_rate;
                        let value = (t * frequency * std::f32::consts::TAU).sin() * 0.5;
                        std::iter::repeat(value).take(channels)
                    })
                    .collect();
                RawFrame::pcm(pts_us, samples)
            });
    }

    fn detach(&self) {
        self.generator.stop();
        tracing::debug!(frames = self.frames_sent(), "Tone source detached");
    }

    fn is_attached(&self) -> bool {
        self.generator.is_running()
    }
}

/// Moving colour bars camera stand-in
pub struct TestPatternSource {
    resolution: Resolution,
    frame_rate: u32,
    origin: Instant,
    generator: Generator,
}

impl TestPatternSource {
    pub fn new(params: &VideoParams, origin: Instant) -> Self {
        Self {
            resolution: params.resolution(),
            frame_rate: params.frame_rate,
            origin,
            generator: Generator::new(),
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.generator.frames_sent.load(Ordering::Relaxed)
    }
}

const BARS: [[u8; 4]; 8] = [
    [255, 255, 255, 255],
    [255, 255, 0, 255],
    [0, 255, 255, 255],
    [0, 255, 0, 255],
    [255, 0, 255, 255],
    [255, 0, 0, 255],
    [0, 0, 255, 255],
    [0, 0, 0, 255],
];

/// RGBA colour bars shifted right by `shift` pixels
pub fn pattern_frame(resolution: Resolution, shift: u32) -> Vec<u8> {
    let Resolution { width, height } = resolution;
    let bar_width = (width / BARS.len() as u32).max(1);
    let row: Vec<u8> = (0..width)
        .flat_map(|x| {
            let bar = ((x + width - shift % width) / bar_width) as usize % BARS.len();
            BARS[bar]
        })
        .collect();
    row.repeat(height as usize)
}

impl FrameSource for TestPatternSource {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn attach(&self, input: TrackInput) {
        let resolution = self.resolution;
        let interval = Duration::from_secs(1) / self.frame_rate.max(1);

        tracing::debug!(
            width = resolution.width,
            height = resolution.height,
            "Attaching test pattern source"
        );
        self.generator
            .start("pattern", input, interval, self.origin, move |index, pts_us| {
                let rgba = pattern_frame(resolution, (index as u32).wrapping_mul(4));
                RawFrame::picture(pts_us, resolution.width, resolution.height, rgba)
            });
    }

    fn detach(&self) {
        self.generator.stop();
        tracing::debug!(frames = self.frames_sent(), "Test pattern source detached");
    }

    fn is_attached(&self) -> bool {
        self.generator.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_frame_size_and_shift() {
        let resolution = Resolution {
            width: 16,
            height: 2,
        };
        let frame = pattern_frame(resolution, 0);
        assert_eq!(frame.len(), 16 * 2 * 4);
        // Two pixels per bar, first bar white
        assert_eq!(&frame[0..4], &[255, 255, 255, 255]);
        assert_eq!(&frame[8..12], &[255, 255, 0, 255]);

        let shifted = pattern_frame(resolution, 2);
        assert_eq!(&shifted[8..12], &[255, 255, 255, 255]);
        assert_ne!(frame, shifted);
    }

    #[test]
    fn test_pattern_wraps_around() {
        let resolution = Resolution {
            width: 16,
            height: 1,
        };
        assert_eq!(pattern_frame(resolution, 16), pattern_frame(resolution, 0));
    }
}
