//! Recording system module
//!
//! - Recorder owns at most one active session and the event broadcaster
//! - RecordingSession ties one container to its track encoders
//! - FinalizeHandle observes a stopped session until its container closes

pub mod coordinator;
pub mod session;
pub mod state;

pub use coordinator::Recorder;
pub use session::{default_codec_factory, CodecFactory, FinalizeHandle, RecordingSession};
pub use state::{RecordingEvent, RecordingState, SessionInfo};
