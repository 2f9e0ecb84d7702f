//! avrecorder - synchronized audio/video capture into a single container file.
//!
//! Each track is encoded on its own worker; the container opens once every
//! track has reported its format and closes once every track has finished.

pub mod capture;
pub mod config;
pub mod container;
pub mod encoder;
pub mod recorder;
pub mod utils;

pub use config::Config;
pub use recorder::{FinalizeHandle, Recorder, RecordingEvent, SessionInfo};
pub use utils::error::{RecorderError, RecorderResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber; `RUST_LOG` overrides the default
/// filter
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avrecorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
