//! Track encoders
//!
//! Each track owns a codec and a worker thread that feeds the shared
//! container writer.

pub mod codec;
pub mod listener;
pub mod state;
pub mod track;

pub use codec::{AudioParams, MediaCodec, PcmAudioCodec, RleVideoCodec, TrackParams, VideoParams};
pub use listener::{LifecycleListener, NoopListener};
pub use state::TrackState;
pub use track::{StartStatus, TrackEncoder, TrackInput};
