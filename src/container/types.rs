//! Track and sample types shared by the writer, sinks and encoders.

use serde::{Deserialize, Serialize};

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Index of a track registered with a [`ContainerWriter`](super::ContainerWriter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackHandle(pub(crate) usize);

impl TrackHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for TrackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a track is, known at registration time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub kind: MediaKind,
    pub name: String,
}

impl TrackDescriptor {
    pub fn new(kind: MediaKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Stream format a track reports once its encoder has started
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TrackFormat {
    #[serde(rename_all = "camelCase")]
    Audio {
        codec: String,
        sample_rate: u32,
        channels: u16,
        bit_rate: u32,
        samples_per_frame: u32,
    },
    #[serde(rename_all = "camelCase")]
    Video {
        codec: String,
        width: u32,
        height: u32,
        frame_rate: u32,
        bit_rate: u32,
        /// Distance between key frames, in frames
        key_frame_interval: u32,
    },
}

impl TrackFormat {
    pub fn kind(&self) -> MediaKind {
        match self {
            TrackFormat::Audio { .. } => MediaKind::Audio,
            TrackFormat::Video { .. } => MediaKind::Video,
        }
    }
}

/// Per-sample flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFlags(u8);

impl SampleFlags {
    pub const NONE: SampleFlags = SampleFlags(0);
    /// Key/sync sample
    pub const KEY: SampleFlags = SampleFlags(0b01);
    /// Final marker of a track; carries no payload
    pub const END_OF_STREAM: SampleFlags = SampleFlags(0b10);

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        SampleFlags(bits & 0b11)
    }

    pub fn contains(&self, other: SampleFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SampleFlags {
    type Output = SampleFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        SampleFlags(self.0 | rhs.0)
    }
}

/// One encoded buffer produced by a track encoder
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSample {
    /// Presentation timestamp in microseconds
    pub pts_us: i64,
    pub flags: SampleFlags,
    pub data: Vec<u8>,
}

impl EncodedSample {
    pub fn new(pts_us: i64, flags: SampleFlags, data: Vec<u8>) -> Self {
        Self { pts_us, flags, data }
    }

    /// End-of-stream marker at `pts_us`
    pub fn end_of_stream(pts_us: i64) -> Self {
        Self {
            pts_us,
            flags: SampleFlags::END_OF_STREAM,
            data: Vec::new(),
        }
    }

    pub fn is_key(&self) -> bool {
        self.flags.contains(SampleFlags::KEY)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(SampleFlags::END_OF_STREAM)
    }
}

/// Maximum number of tracks a single container can hold
pub const MAX_TRACKS: usize = 64;

/// Fixed-size set of track handles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackSet(u64);

impl TrackSet {
    pub fn insert(&mut self, handle: TrackHandle) -> bool {
        let bit = 1u64 << handle.0;
        let inserted = self.0 & bit == 0;
        self.0 |= bit;
        inserted
    }

    pub fn contains(&self, handle: TrackHandle) -> bool {
        self.0 & (1u64 << handle.0) != 0
    }

    pub fn union(&self, other: &TrackSet) -> TrackSet {
        TrackSet(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }
}
