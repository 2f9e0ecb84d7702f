//! AVMX container layout
//!
//! ```text
//! "AVMX" | u16 version | u32 header_len | header JSON
//! record*: u8 track | u8 flags | i64 pts_us | u32 len | payload
//! index JSON | u64 index_offset | "XMVA"
//! ```
//!
//! All integers are little-endian. The index is only present once the
//! container has been closed, so a file without the footer is not valid.

use super::types::{EncodedSample, MediaKind, SampleFlags, TrackFormat};
use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

pub const HEADER_MAGIC: &[u8; 4] = b"AVMX";
pub const FOOTER_MAGIC: &[u8; 4] = b"XMVA";
pub const FORMAT_VERSION: u16 = 1;

/// Default file extension for finalized containers
pub const CONTAINER_EXTENSION: &str = "avmx";

/// Size of a sample record without its payload
pub const RECORD_HEADER_LEN: u64 = 1 + 1 + 8 + 4;

/// Size of the footer: index offset + magic
pub const FOOTER_LEN: u64 = 8 + 4;

/// One track in the container header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderEntry {
    pub track: usize,
    pub name: String,
    pub format: TrackFormat,
}

/// Per-track statistics written into the trailer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackIndex {
    pub track: usize,
    pub kind: MediaKind,
    pub name: String,
    pub samples: u64,
    pub bytes: u64,
    pub first_pts_us: Option<i64>,
    pub last_pts_us: Option<i64>,
    /// File offsets of key sample records
    pub key_offsets: Vec<u64>,
    pub end_of_stream: bool,
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl TrackIndex {
    pub fn duration_us(&self) -> i64 {
        match (self.first_pts_us, self.last_pts_us) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        }
    }

    /// A track is complete when it ended cleanly with an end-of-stream marker
    pub fn is_complete(&self) -> bool {
        self.end_of_stream && !self.failed
    }
}

/// Trailer index of a closed container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerIndex {
    pub version: u16,
    pub tracks: Vec<TrackIndex>,
    pub total_samples: u64,
    pub total_bytes: u64,
}

impl ContainerIndex {
    pub fn track(&self, track: usize) -> Option<&TrackIndex> {
        self.tracks.iter().find(|t| t.track == track)
    }

    /// Read and validate the index of a finalized container
    pub fn read(path: &Path) -> RecorderResult<Self> {
        let mut file = File::open(path)?;
        read_magic(&mut file, HEADER_MAGIC)?;

        let len = file.metadata()?.len();
        if len < FOOTER_LEN + 4 {
            return Err(invalid("file too short for footer"));
        }
        file.seek(SeekFrom::Start(len - FOOTER_LEN))?;
        let index_offset = read_u64(&mut file)?;
        read_magic(&mut file, FOOTER_MAGIC)?;

        if index_offset >= len - FOOTER_LEN {
            return Err(invalid("index offset out of range"));
        }
        file.seek(SeekFrom::Start(index_offset))?;
        let mut json = vec![0u8; (len - FOOTER_LEN - index_offset) as usize];
        file.read_exact(&mut json)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Parsed contents of a finalized container
#[derive(Debug, Clone)]
pub struct ContainerContents {
    pub header: Vec<HeaderEntry>,
    pub samples: Vec<(usize, EncodedSample)>,
    pub index: ContainerIndex,
}

impl ContainerContents {
    pub fn samples_for(&self, track: usize) -> impl Iterator<Item = &EncodedSample> {
        self.samples
            .iter()
            .filter(move |(t, _)| *t == track)
            .map(|(_, s)| s)
    }
}

/// Read the header, every sample record and the index of a finalized container
pub fn read_container(path: &Path) -> RecorderResult<ContainerContents> {
    let index = ContainerIndex::read(path)?;
    let len = std::fs::metadata(path)?.len();
    let mut reader = BufReader::new(File::open(path)?);

    read_magic(&mut reader, HEADER_MAGIC)?;
    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;
    if u16::from_le_bytes(version) != FORMAT_VERSION {
        return Err(invalid("unsupported version"));
    }
    let header_len = read_u32(&mut reader)?;
    let mut header_json = vec![0u8; header_len as usize];
    reader.read_exact(&mut header_json)?;
    let header: Vec<HeaderEntry> = serde_json::from_slice(&header_json)?;

    let index_offset = {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(len - FOOTER_LEN))?;
        read_u64(&mut file)?
    };

    let mut position = 4 + 2 + 4 + header_len as u64;
    let mut samples = Vec::new();
    while position < index_offset {
        let mut head = [0u8; 2];
        reader.read_exact(&mut head)?;
        let pts_us = read_u64(&mut reader)? as i64;
        let size = read_u32(&mut reader)?;
        let mut data = vec![0u8; size as usize];
        reader.read_exact(&mut data)?;
        position += RECORD_HEADER_LEN + size as u64;
        samples.push((
            head[0] as usize,
            EncodedSample::new(pts_us, SampleFlags::from_bits(head[1]), data),
        ));
    }

    Ok(ContainerContents {
        header,
        samples,
        index,
    })
}

fn invalid(message: &str) -> RecorderError {
    RecorderError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("not a finalized AVMX container: {message}"),
    ))
}

fn read_magic(reader: &mut impl Read, magic: &[u8; 4]) -> RecorderResult<()> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    if &buf != magic {
        return Err(invalid("bad magic"));
    }
    Ok(())
}

fn read_u32(reader: &mut impl Read) -> RecorderResult<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut impl Read) -> RecorderResult<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
