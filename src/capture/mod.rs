//! Capture sources
//!
//! Raw frame types, the frame source interface, and the synthetic sources used
//! by the demo binary.

pub mod hub;
pub mod synthetic;
pub mod traits;

pub use hub::SourceHub;
pub use synthetic::{TestPatternSource, ToneSource};
pub use traits::{FrameSource, RawFrame, RawPayload, Resolution};
