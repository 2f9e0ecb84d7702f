//! Routes track lifecycle notifications to frame sources

use super::traits::FrameSource;
use crate::encoder::{LifecycleListener, TrackInput};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Lifecycle listener that attaches a matching source when a track is ready
/// and detaches it when the track stops
#[derive(Default)]
pub struct SourceHub {
    sources: Vec<Arc<dyn FrameSource>>,
    /// Track id -> position in `sources`
    attached: Mutex<HashMap<u64, usize>>,
}

impl SourceHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn FrameSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn attached_count(&self) -> usize {
        self.attached.lock().len()
    }
}

impl LifecycleListener for SourceHub {
    fn on_ready(&self, input: &TrackInput) {
        let source = {
            let mut attached = self.attached.lock();
            let free = self.sources.iter().enumerate().position(|(i, source)| {
                source.kind() == input.kind() && !attached.values().any(|&used| used == i)
            });
            match free {
                Some(position) => {
                    attached.insert(input.id(), position);
                    self.sources[position].clone()
                }
                None => {
                    tracing::warn!(track = %input.handle(), kind = %input.kind(), "No free source for track");
                    return;
                }
            }
        };
        tracing::debug!(track = %input.handle(), kind = %input.kind(), "Attaching source");
        source.attach(input.clone());
    }

    fn on_stopped(&self, input: &TrackInput) {
        let position = self.attached.lock().remove(&input.id());
        if let Some(position) = position {
            tracing::debug!(track = %input.handle(), "Detaching source");
            self.sources[position].detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::sink::MemorySink;
    use crate::container::types::MediaKind;
    use crate::container::writer::ContainerWriter;
    use crate::encoder::codec::{TrackParams, VideoParams};
    use crate::encoder::{NoopListener, TrackEncoder};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FlagSource {
        attached: AtomicBool,
    }

    impl FrameSource for FlagSource {
        fn kind(&self) -> MediaKind {
            MediaKind::Video
        }

        fn attach(&self, _input: TrackInput) {
            self.attached.store(true, Ordering::SeqCst);
        }

        fn detach(&self) {
            self.attached.store(false, Ordering::SeqCst);
        }

        fn is_attached(&self) -> bool {
            self.attached.load(Ordering::SeqCst)
        }
    }

    fn video_track(label: &str) -> TrackEncoder {
        let writer = Arc::new(ContainerWriter::new(label, Box::new(MemorySink::new())));
        TrackEncoder::configure(
            "video",
            &TrackParams::Video(VideoParams::default()),
            writer,
            Arc::new(NoopListener),
        )
        .unwrap()
    }

    #[test]
    fn test_tracks_with_same_handle_in_different_containers() {
        let first_source = Arc::new(FlagSource::default());
        let second_source = Arc::new(FlagSource::default());
        let hub = SourceHub::new()
            .with_source(first_source.clone())
            .with_source(second_source.clone());

        let draining = video_track("first").input();
        let live = video_track("second").input();
        assert_eq!(draining.handle(), live.handle());
        assert_ne!(draining.id(), live.id());

        hub.on_ready(&draining);
        hub.on_ready(&live);
        assert!(first_source.is_attached());
        assert!(second_source.is_attached());
        assert_eq!(hub.attached_count(), 2);

        hub.on_stopped(&draining);
        assert!(!first_source.is_attached());
        assert!(second_source.is_attached());
        assert_eq!(hub.attached_count(), 1);

        // Stopping the same track twice releases nothing else
        hub.on_stopped(&draining);
        assert!(second_source.is_attached());

        hub.on_stopped(&live);
        assert!(!second_source.is_attached());
        assert_eq!(hub.attached_count(), 0);
    }

    #[test]
    fn test_no_free_source_leaves_track_unattached() {
        let source = Arc::new(FlagSource::default());
        let hub = SourceHub::new().with_source(source.clone());

        let first = video_track("first").input();
        let second = video_track("second").input();
        hub.on_ready(&first);
        hub.on_ready(&second);
        assert_eq!(hub.attached_count(), 1);

        // The unattached track stopping must not detach the other one's source
        hub.on_stopped(&second);
        assert!(source.is_attached());
        hub.on_stopped(&first);
        assert!(!source.is_attached());
    }
}
