//! Container module
//!
//! Multiplexes the encoded tracks of one recording session into a single file:
//! - ContainerWriter gates open/close on the tracks' lifecycle notifications
//! - ContainerSink abstracts the byte-level output (file or memory)
//! - format defines the AVMX layout and reads finalized files back

pub mod format;
pub mod sink;
pub mod types;
pub mod writer;

pub use format::{read_container, ContainerIndex, TrackIndex, CONTAINER_EXTENSION};
pub use sink::{ContainerSink, FileSink, MemorySink};
pub use types::{
    EncodedSample, MediaKind, SampleFlags, TrackDescriptor, TrackFormat, TrackHandle,
};
pub use writer::{ContainerSummary, ContainerWriter, WriterPhase};
