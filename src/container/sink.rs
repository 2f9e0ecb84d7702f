//! Container sinks
//!
//! A sink is the byte-level backend of a [`ContainerWriter`](super::ContainerWriter).
//! The writer guarantees the call order: `write_header` once, any number of
//! `write_sample`, then exactly one of `write_trailer` or `abort`.

use super::format::{
    ContainerIndex, HeaderEntry, FOOTER_MAGIC, FORMAT_VERSION, HEADER_MAGIC, RECORD_HEADER_LEN,
};
use super::types::{EncodedSample, TrackHandle};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Byte-level container backend
pub trait ContainerSink: Send {
    /// Write the container header describing every track that will carry samples
    fn write_header(&mut self, tracks: &[HeaderEntry]) -> RecorderResult<()>;

    /// Append one sample record, returning the file offset of the record
    fn write_sample(&mut self, track: TrackHandle, sample: &EncodedSample) -> RecorderResult<u64>;

    /// Write the index and make the output valid
    fn write_trailer(&mut self, index: &ContainerIndex) -> RecorderResult<()>;

    /// Discard the output; the container will never be valid
    fn abort(&mut self) -> RecorderResult<()>;
}

/// Writes an AVMX file
///
/// Data goes to `<path>.part` and is renamed to `<path>` only once the
/// trailer is on disk, so the final path never holds a partial container.
pub struct FileSink {
    path: PathBuf,
    part_path: PathBuf,
    writer: Option<BufWriter<File>>,
    offset: u64,
    samples_written: u64,
}

impl FileSink {
    pub fn create(path: impl Into<PathBuf>) -> RecorderResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let part_path = part_path(&path);
        let file = File::create(&part_path)?;

        tracing::info!(path = %part_path.display(), "Container sink opened");

        Ok(Self {
            path,
            part_path,
            writer: Some(BufWriter::with_capacity(1024 * 1024, file)),
            offset: 0,
            samples_written: 0,
        })
    }

    fn writer(&mut self) -> RecorderResult<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| RecorderError::Lifecycle("container sink already finished".to_string()))
    }

    fn put(&mut self, bytes: &[u8]) -> RecorderResult<()> {
        self.writer()?.write_all(bytes)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }
}

/// Temporary path used while the container is being written
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

impl ContainerSink for FileSink {
    fn write_header(&mut self, tracks: &[HeaderEntry]) -> RecorderResult<()> {
        let json = serde_json::to_vec(tracks)?;
        self.put(HEADER_MAGIC)?;
        self.put(&FORMAT_VERSION.to_le_bytes())?;
        self.put(&(json.len() as u32).to_le_bytes())?;
        self.put(&json)?;
        tracing::debug!(tracks = tracks.len(), "Container header written");
        Ok(())
    }

    fn write_sample(&mut self, track: TrackHandle, sample: &EncodedSample) -> RecorderResult<u64> {
        let record_offset = self.offset;
        let mut head = [0u8; RECORD_HEADER_LEN as usize];
        head[0] = track.index() as u8;
        head[1] = sample.flags.bits();
        head[2..10].copy_from_slice(&sample.pts_us.to_le_bytes());
        head[10..14].copy_from_slice(&(sample.data.len() as u32).to_le_bytes());
        self.put(&head)?;
        self.put(&sample.data)?;

        self.samples_written += 1;
        if self.samples_written % 500 == 0 {
            tracing::debug!(
                samples = self.samples_written,
                bytes_kb = self.offset / 1024,
                "Sink progress"
            );
        }
        Ok(record_offset)
    }

    fn write_trailer(&mut self, index: &ContainerIndex) -> RecorderResult<()> {
        let index_offset = self.offset;
        let json = serde_json::to_vec(index)?;
        self.put(&json)?;
        self.put(&index_offset.to_le_bytes())?;
        self.put(FOOTER_MAGIC)?;

        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        std::fs::rename(&self.part_path, &self.path)?;

        tracing::info!(
            path = %self.path.display(),
            samples = self.samples_written,
            bytes_kb = self.offset / 1024,
            "Container finalized"
        );
        Ok(())
    }

    fn abort(&mut self) -> RecorderResult<()> {
        self.writer.take();
        match std::fs::remove_file(&self.part_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::warn!(path = %self.path.display(), "Container aborted, output discarded");
        Ok(())
    }
}

/// Everything a [`MemorySink`] has received
#[derive(Debug, Default, Clone)]
pub struct MemoryContents {
    pub header: Option<Vec<HeaderEntry>>,
    pub header_writes: usize,
    pub samples: Vec<(TrackHandle, EncodedSample)>,
    pub trailer: Option<ContainerIndex>,
    pub trailer_writes: usize,
    pub aborted: bool,
}

impl MemoryContents {
    pub fn samples_for(&self, track: TrackHandle) -> Vec<&EncodedSample> {
        self.samples
            .iter()
            .filter(|(t, _)| *t == track)
            .map(|(_, s)| s)
            .collect()
    }
}

/// In-memory sink; clones share the same contents
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    contents: Arc<Mutex<MemoryContents>>,
    write_delay: Option<Duration>,
    offset: u64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every `write_sample`, simulating slow storage
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub fn contents(&self) -> MemoryContents {
        self.contents.lock().clone()
    }
}

impl ContainerSink for MemorySink {
    fn write_header(&mut self, tracks: &[HeaderEntry]) -> RecorderResult<()> {
        let mut contents = self.contents.lock();
        contents.header = Some(tracks.to_vec());
        contents.header_writes += 1;
        Ok(())
    }

    fn write_sample(&mut self, track: TrackHandle, sample: &EncodedSample) -> RecorderResult<u64> {
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        let record_offset = self.offset;
        self.offset += RECORD_HEADER_LEN + sample.data.len() as u64;
        self.contents.lock().samples.push((track, sample.clone()));
        Ok(record_offset)
    }

    fn write_trailer(&mut self, index: &ContainerIndex) -> RecorderResult<()> {
        let mut contents = self.contents.lock();
        contents.trailer = Some(index.clone());
        contents.trailer_writes += 1;
        Ok(())
    }

    fn abort(&mut self) -> RecorderResult<()> {
        self.contents.lock().aborted = true;
        Ok(())
    }
}
