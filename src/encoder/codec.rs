//! Media codec strategies
//!
//! A [`TrackEncoder`](super::TrackEncoder) is generic over media kind; what it
//! does with raw frames is decided by the [`MediaCodec`] it is given.
//! - PcmAudioCodec packs float PCM into fixed-size s16le frames
//! - RleVideoCodec run-length encodes key frames and XOR deltas, holding a few
//!   frames in flight like a hardware encoder pipeline

use crate::capture::traits::{RawFrame, RawPayload, Resolution};
use crate::container::types::{EncodedSample, MediaKind, SampleFlags, TrackFormat};
use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Encoding strategy for one media kind
pub trait MediaCodec: Send {
    fn kind(&self) -> MediaKind;

    /// Acquire encoder resources and report the output format.
    ///
    /// Runs on the track's worker thread and may take a while.
    fn start(&mut self) -> RecorderResult<TrackFormat>;

    /// Encode one raw frame, appending any finished samples to `out`
    fn encode(&mut self, frame: RawFrame, out: &mut Vec<EncodedSample>) -> RecorderResult<()>;

    /// Emit everything still buffered inside the encoder
    fn flush(&mut self, out: &mut Vec<EncodedSample>) -> RecorderResult<()>;
}

/// Audio track parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Nominal bit rate advertised in the track format
    pub bit_rate: u32,
    /// Samples per channel in each encoded frame
    pub samples_per_frame: u32,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            bit_rate: 64_000,
            samples_per_frame: 1024,
        }
    }
}

impl AudioParams {
    pub fn validate(&self) -> RecorderResult<()> {
        check_range("sample_rate", self.sample_rate, 8_000, 192_000)?;
        check_range("channels", self.channels as u32, 1, 8)?;
        check_range("samples_per_frame", self.samples_per_frame, 64, 8_192)?;
        if self.bit_rate == 0 {
            return Err(RecorderError::Configuration(
                "bit_rate must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Duration of one encoded frame
    pub fn frame_duration_us(&self) -> i64 {
        self.samples_per_frame as i64 * 1_000_000 / self.sample_rate as i64
    }
}

/// Video track parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bits_per_pixel: f32,
    pub key_frame_interval_secs: u32,
    /// Frames held inside the encoder before output
    pub latency_frames: u32,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 25,
            bits_per_pixel: 0.25,
            key_frame_interval_secs: 10,
            latency_frames: 2,
        }
    }
}

impl VideoParams {
    pub fn validate(&self) -> RecorderResult<()> {
        check_range("width", self.width, 16, 4096)?;
        check_range("height", self.height, 16, 4096)?;
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(RecorderError::Configuration(format!(
                "video size {}x{} must be even",
                self.width, self.height
            )));
        }
        check_range("frame_rate", self.frame_rate, 1, 120)?;
        check_range("key_frame_interval_secs", self.key_frame_interval_secs, 1, 600)?;
        if !(self.bits_per_pixel > 0.0 && self.bits_per_pixel <= 8.0) {
            return Err(RecorderError::Configuration(format!(
                "bits_per_pixel {} out of range (0, 8]",
                self.bits_per_pixel
            )));
        }
        check_range("latency_frames", self.latency_frames, 0, 16)?;
        Ok(())
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    pub fn bit_rate(&self) -> u32 {
        let bit_rate = (self.bits_per_pixel
            * self.frame_rate as f32
            * self.width as f32
            * self.height as f32) as u32;
        tracing::debug!(
            bit_rate_mbps = bit_rate as f32 / 1024.0 / 1024.0,
            "Video bit rate"
        );
        bit_rate
    }

    pub fn key_frame_interval(&self) -> u32 {
        self.frame_rate
            .saturating_mul(self.key_frame_interval_secs)
            .max(1)
    }
}

/// Parameters for one track, tagged by media kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TrackParams {
    Audio(AudioParams),
    Video(VideoParams),
}

impl TrackParams {
    pub fn kind(&self) -> MediaKind {
        match self {
            TrackParams::Audio(_) => MediaKind::Audio,
            TrackParams::Video(_) => MediaKind::Video,
        }
    }

    pub fn validate(&self) -> RecorderResult<()> {
        match self {
            TrackParams::Audio(params) => params.validate(),
            TrackParams::Video(params) => params.validate(),
        }
    }

    /// Validate and build the default codec for these parameters
    pub fn build_codec(&self) -> RecorderResult<Box<dyn MediaCodec>> {
        self.validate()?;
        Ok(match self {
            TrackParams::Audio(params) => Box::new(PcmAudioCodec::new(params.clone())),
            TrackParams::Video(params) => Box::new(RleVideoCodec::new(params.clone())),
        })
    }
}

fn check_range(name: &str, value: u32, min: u32, max: u32) -> RecorderResult<()> {
    if value < min || value > max {
        return Err(RecorderError::Configuration(format!(
            "{name} {value} out of range {min}..={max}"
        )));
    }
    Ok(())
}

/// Float PCM to 16-bit little-endian frames
pub struct PcmAudioCodec {
    params: AudioParams,
    pending: Vec<i16>,
    /// Timestamp of the first sample in `pending`
    pending_pts_us: i64,
}

impl PcmAudioCodec {
    pub const CODEC_NAME: &'static str = "pcm_s16le";

    pub fn new(params: AudioParams) -> Self {
        Self {
            params,
            pending: Vec::new(),
            pending_pts_us: 0,
        }
    }

    fn frame_len(&self) -> usize {
        self.params.samples_per_frame as usize * self.params.channels as usize
    }

    fn emit(&mut self, count: usize, out: &mut Vec<EncodedSample>) {
        let data = self
            .pending
            .drain(..count)
            .flat_map(|s| s.to_le_bytes())
            .collect();
        out.push(EncodedSample::new(self.pending_pts_us, SampleFlags::KEY, data));

        let frames = (count / self.params.channels as usize) as i64;
        self.pending_pts_us += frames * 1_000_000 / self.params.sample_rate as i64;
    }
}

impl MediaCodec for PcmAudioCodec {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn start(&mut self) -> RecorderResult<TrackFormat> {
        tracing::info!(
            sample_rate = self.params.sample_rate,
            channels = self.params.channels,
            "Audio encoder started"
        );
        Ok(TrackFormat::Audio {
            codec: Self::CODEC_NAME.to_string(),
            sample_rate: self.params.sample_rate,
            channels: self.params.channels,
            bit_rate: self.params.bit_rate,
            samples_per_frame: self.params.samples_per_frame,
        })
    }

    fn encode(&mut self, frame: RawFrame, out: &mut Vec<EncodedSample>) -> RecorderResult<()> {
        let RawPayload::Pcm(samples) = frame.payload else {
            return Err(RecorderError::EncoderFault(
                "audio encoder received a picture".to_string(),
            ));
        };
        if samples.len() % self.params.channels as usize != 0 {
            return Err(RecorderError::EncoderFault(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                self.params.channels
            )));
        }

        if self.pending.is_empty() {
            self.pending_pts_us = frame.pts_us;
        }
        self.pending.extend(
            samples
                .iter()
                .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
        );

        let frame_len = self.frame_len();
        while self.pending.len() >= frame_len {
            self.emit(frame_len, out);
        }
        Ok(())
    }

    fn flush(&mut self, out: &mut Vec<EncodedSample>) -> RecorderResult<()> {
        if !self.pending.is_empty() {
            self.emit(self.pending.len(), out);
        }
        Ok(())
    }
}

/// Run-length video codec with XOR deltas between key frames
pub struct RleVideoCodec {
    params: VideoParams,
    key_frame_interval: u32,
    frames_since_key: u32,
    previous: Option<Vec<u8>>,
    in_flight: VecDeque<EncodedSample>,
}

impl RleVideoCodec {
    pub const CODEC_NAME: &'static str = "rle-delta";

    pub fn new(params: VideoParams) -> Self {
        let key_frame_interval = params.key_frame_interval();
        Self {
            params,
            key_frame_interval,
            frames_since_key: 0,
            previous: None,
            in_flight: VecDeque::new(),
        }
    }
}

impl MediaCodec for RleVideoCodec {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn start(&mut self) -> RecorderResult<TrackFormat> {
        tracing::info!(
            width = self.params.width,
            height = self.params.height,
            frame_rate = self.params.frame_rate,
            "Video encoder started"
        );
        Ok(TrackFormat::Video {
            codec: Self::CODEC_NAME.to_string(),
            width: self.params.width,
            height: self.params.height,
            frame_rate: self.params.frame_rate,
            bit_rate: self.params.bit_rate(),
            key_frame_interval: self.key_frame_interval,
        })
    }

    fn encode(&mut self, frame: RawFrame, out: &mut Vec<EncodedSample>) -> RecorderResult<()> {
        let RawPayload::Picture {
            width,
            height,
            rgba,
        } = frame.payload
        else {
            return Err(RecorderError::EncoderFault(
                "video encoder received PCM".to_string(),
            ));
        };
        if width != self.params.width || height != self.params.height {
            return Err(RecorderError::EncoderFault(format!(
                "picture {width}x{height} does not match {}x{}",
                self.params.width, self.params.height
            )));
        }
        if rgba.len() != width as usize * height as usize * 4 {
            return Err(RecorderError::EncoderFault(format!(
                "picture has {} bytes, expected {}",
                rgba.len(),
                width as usize * height as usize * 4
            )));
        }

        let key = match &self.previous {
            None => true,
            Some(_) => self.frames_since_key >= self.key_frame_interval,
        };
        let sample = match (&self.previous, key) {
            (Some(previous), false) => {
                let delta: Vec<u8> = rgba.iter().zip(previous).map(|(a, b)| a ^ b).collect();
                self.frames_since_key += 1;
                EncodedSample::new(frame.pts_us, SampleFlags::NONE, rle_encode(&delta))
            }
            _ => {
                self.frames_since_key = 1;
                EncodedSample::new(frame.pts_us, SampleFlags::KEY, rle_encode(&rgba))
            }
        };
        self.previous = Some(rgba);

        self.in_flight.push_back(sample);
        while self.in_flight.len() > self.params.latency_frames as usize {
            if let Some(sample) = self.in_flight.pop_front() {
                out.push(sample);
            }
        }
        Ok(())
    }

    fn flush(&mut self, out: &mut Vec<EncodedSample>) -> RecorderResult<()> {
        out.extend(self.in_flight.drain(..));
        Ok(())
    }
}

/// Encode as (run length, byte) pairs
pub fn rle_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 4);
    let mut iter = data.iter().peekable();
    while let Some(&byte) = iter.next() {
        let mut run = 1u8;
        while run < u8::MAX && iter.peek() == Some(&&byte) {
            iter.next();
            run += 1;
        }
        out.push(run);
        out.push(byte);
    }
    out
}

pub fn rle_decode(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(2)
        .flat_map(|pair| std::iter::repeat(pair[1]).take(pair[0] as usize))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_video() -> VideoParams {
        VideoParams {
            width: 16,
            height: 16,
            frame_rate: 2,
            key_frame_interval_secs: 2,
            latency_frames: 2,
            ..VideoParams::default()
        }
    }

    fn picture(pts_us: i64, fill: u8) -> RawFrame {
        RawFrame::picture(pts_us, 16, 16, vec![fill; 16 * 16 * 4])
    }

    #[test]
    fn test_default_params_are_valid() {
        AudioParams::default().validate().unwrap();
        VideoParams::default().validate().unwrap();
        assert_eq!(VideoParams::default().bit_rate(), 5_760_000);
        assert_eq!(VideoParams::default().key_frame_interval(), 250);
    }

    #[test]
    fn test_rejects_unsupported_params() {
        let odd = VideoParams {
            width: 1281,
            ..VideoParams::default()
        };
        assert!(matches!(odd.validate(), Err(RecorderError::Configuration(_))));

        let huge = VideoParams {
            width: 8192,
            ..VideoParams::default()
        };
        assert!(huge.validate().is_err());

        let no_rate = AudioParams {
            sample_rate: 1_000,
            ..AudioParams::default()
        };
        assert!(TrackParams::Audio(no_rate).build_codec().is_err());

        let endless_gop = VideoParams {
            frame_rate: 120,
            key_frame_interval_secs: 40_000_000,
            ..VideoParams::default()
        };
        assert!(matches!(
            TrackParams::Video(endless_gop.clone()).build_codec(),
            Err(RecorderError::Configuration(_))
        ));
        assert_eq!(endless_gop.key_frame_interval(), u32::MAX);

        let no_keys = VideoParams {
            key_frame_interval_secs: 0,
            ..VideoParams::default()
        };
        assert!(no_keys.validate().is_err());
        assert_eq!(no_keys.key_frame_interval(), 1);
    }

    #[test]
    fn test_audio_frames_have_fixed_size_and_advancing_pts() {
        let params = AudioParams {
            sample_rate: 48_000,
            channels: 2,
            samples_per_frame: 480,
            ..AudioParams::default()
        };
        let mut codec = PcmAudioCodec::new(params);
        codec.start().unwrap();

        let mut out = Vec::new();
        // 700 stereo samples: one full frame plus a remainder
        codec
            .encode(RawFrame::pcm(1_000, vec![0.5; 1_400]), &mut out)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pts_us, 1_000);
        assert_eq!(out[0].data.len(), 480 * 2 * 2);
        assert!(out[0].is_key());

        codec.flush(&mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].pts_us, 1_000 + 10_000);
        assert_eq!(out[1].data.len(), 220 * 2 * 2);
    }

    #[test]
    fn test_audio_rejects_wrong_payload() {
        let mut codec = PcmAudioCodec::new(AudioParams::default());
        let err = codec.encode(picture(0, 0), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, RecorderError::EncoderFault(_)));

        let mut stereo = PcmAudioCodec::new(AudioParams {
            channels: 2,
            ..AudioParams::default()
        });
        assert!(stereo.encode(RawFrame::pcm(0, vec![0.0; 3]), &mut Vec::new()).is_err());
    }

    #[test]
    fn test_video_pipeline_holds_frames_until_flush() {
        let mut codec = RleVideoCodec::new(small_video());
        let format = codec.start().unwrap();
        assert_eq!(format.kind(), MediaKind::Video);

        let mut out = Vec::new();
        codec.encode(picture(0, 1), &mut out).unwrap();
        codec.encode(picture(500_000, 1), &mut out).unwrap();
        assert!(out.is_empty());

        codec.encode(picture(1_000_000, 2), &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].is_key());

        codec.flush(&mut out).unwrap();
        assert_eq!(out.len(), 3);
        let pts: Vec<i64> = out.iter().map(|s| s.pts_us).collect();
        assert_eq!(pts, vec![0, 500_000, 1_000_000]);
    }

    #[test]
    fn test_video_key_frame_interval_and_delta_decode() {
        let mut codec = RleVideoCodec::new(VideoParams {
            latency_frames: 0,
            ..small_video()
        });
        codec.start().unwrap();

        let mut out = Vec::new();
        for i in 0..6 {
            codec.encode(picture(i * 500_000, i as u8), &mut out).unwrap();
        }
        let keys: Vec<bool> = out.iter().map(|s| s.is_key()).collect();
        // Interval is frame_rate * secs = 4 frames
        assert_eq!(keys, vec![true, false, false, false, true, false]);

        let first = rle_decode(&out[0].data);
        let delta = rle_decode(&out[1].data);
        let second: Vec<u8> = first.iter().zip(&delta).map(|(a, b)| a ^ b).collect();
        assert_eq!(second, vec![1u8; 16 * 16 * 4]);
    }

    #[test]
    fn test_video_rejects_mismatched_picture() {
        let mut codec = RleVideoCodec::new(small_video());
        let err = codec
            .encode(RawFrame::picture(0, 32, 16, vec![0; 32 * 16 * 4]), &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, RecorderError::EncoderFault(_)));
    }

    #[test]
    fn test_rle_long_runs() {
        let data = vec![7u8; 600];
        let encoded = rle_encode(&data);
        assert_eq!(encoded, vec![255, 7, 255, 7, 90, 7]);
        assert_eq!(rle_decode(&encoded), data);
        assert!(rle_encode(&[]).is_empty());
    }
}
