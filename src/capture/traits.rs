//! Capture trait definitions
//!
//! Platform-agnostic raw frame types and the frame source interface.

use crate::container::types::MediaKind;
use crate::encoder::TrackInput;
use serde::{Deserialize, Serialize};

/// Raw data produced by a capture source
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// Interleaved PCM samples in [-1.0, 1.0]
    Pcm(Vec<f32>),

    /// RGBA picture, 4 bytes per pixel, no row padding
    Picture {
        width: u32,
        height: u32,
        rgba: Vec<u8>,
    },
}

/// One raw frame with its capture timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Presentation timestamp in microseconds
    pub pts_us: i64,
    pub payload: RawPayload,
}

impl RawFrame {
    pub fn pcm(pts_us: i64, samples: Vec<f32>) -> Self {
        Self {
            pts_us,
            payload: RawPayload::Pcm(samples),
        }
    }

    pub fn picture(pts_us: i64, width: u32, height: u32, rgba: Vec<u8>) -> Self {
        Self {
            pts_us,
            payload: RawPayload::Picture {
                width,
                height,
                rgba,
            },
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self.payload {
            RawPayload::Pcm(_) => MediaKind::Audio,
            RawPayload::Picture { .. } => MediaKind::Video,
        }
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// A producer of raw frames for one media kind
///
/// The source is attached when its track becomes ready and detached when the
/// track stops. It must not push frames after `detach` returns.
pub trait FrameSource: Send + Sync {
    /// Media kind this source produces
    fn kind(&self) -> MediaKind;

    /// Start pushing frames into `input`
    fn attach(&self, input: TrackInput);

    /// Stop pushing frames and drop the input
    fn detach(&self);

    /// Whether the source currently holds an input
    fn is_attached(&self) -> bool;
}
