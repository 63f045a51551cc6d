//! Commit journal
//!
//! Every committed store batch, and every id block the store reserves, is
//! appended here as one framed record before it becomes visible. Replaying
//! the records in order rebuilds the store after a restart.
//!
//! # Record framing
//! ```text
//! [frame_len:    u32]   // bytes following this field
//! [checksum:     u32]   // CRC32C of everything following this field
//! [sequence:     u64]
//! [committed_at: i64]   // unix nanos
//! [kind:         u8 ]
//! [payload:    bytes]   // bincode
//! ```
//! Integers are little-endian. Records live in numbered segment files
//! (`segment-000000.log`, ...); appending moves to a fresh segment once the
//! current one reaches the configured size.

use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// checksum + sequence + committed_at + kind
const FRAME_HEADER: usize = 4 + 8 + 8 + 1;

/// Larger length prefixes are garbage, not records
const MAX_FRAME: usize = 64 * 1024 * 1024;

const SEGMENT_PREFIX: &str = "segment-";
const SEGMENT_EXT: &str = ".log";

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("Journal IO: {0}")]
    Io(#[from] io::Error),

    #[error("Bad frame: {0}")]
    BadFrame(String),

    #[error("Unknown record kind {0}")]
    UnknownKind(u8),

    #[error("Record of {0} bytes exceeds the frame limit")]
    Oversized(usize),
}

/// What a record's payload holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// bincode [`WriteBatch`](crate::store::WriteBatch)
    WriteBatch,
    /// bincode [`IdReservation`](crate::store::IdReservation)
    IdReservation,
}

impl RecordKind {
    fn tag(self) -> u8 {
        match self {
            RecordKind::WriteBatch => 1,
            RecordKind::IdReservation => 2,
        }
    }
}

impl TryFrom<u8> for RecordKind {
    type Error = JournalError;

    fn try_from(tag: u8) -> Result<Self, JournalError> {
        match tag {
            1 => Ok(RecordKind::WriteBatch),
            2 => Ok(RecordKind::IdReservation),
            other => Err(JournalError::UnknownKind(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalRecord {
    /// Gapless, starting at 1
    pub sequence: u64,
    pub committed_at: i64,
    pub kind: RecordKind,
    pub payload: Vec<u8>,
}

/// Outcome of decoding the front of a buffer
#[derive(Debug)]
pub enum Frame {
    Record { record: JournalRecord, len: usize },
    /// The buffer ends inside the frame
    Torn,
    /// The frame is whole but its bytes do not match the stored checksum
    ChecksumMismatch { len: usize },
}

impl JournalRecord {
    pub fn encode(&self) -> Result<Vec<u8>, JournalError> {
        let frame_len = FRAME_HEADER + self.payload.len();
        if frame_len > MAX_FRAME {
            return Err(JournalError::Oversized(frame_len));
        }

        let mut frame = Vec::with_capacity(4 + frame_len);
        frame.extend_from_slice(&(frame_len as u32).to_le_bytes());
        frame.extend_from_slice(&[0; 4]);
        frame.extend_from_slice(&self.sequence.to_le_bytes());
        frame.extend_from_slice(&self.committed_at.to_le_bytes());
        frame.push(self.kind.tag());
        frame.extend_from_slice(&self.payload);

        let checksum = crc32c(&frame[8..]);
        frame[4..8].copy_from_slice(&checksum.to_le_bytes());
        Ok(frame)
    }

    /// Decode the frame at the start of `buf`.
    ///
    /// A length prefix no record could have is [`JournalError::BadFrame`];
    /// a verified frame with an unrecognised kind is
    /// [`JournalError::UnknownKind`].
    pub fn decode(buf: &[u8]) -> Result<Frame, JournalError> {
        if buf.len() < 4 {
            return Ok(Frame::Torn);
        }
        let frame_len = u32::from_le_bytes(le_array(buf, 0)) as usize;
        if !(FRAME_HEADER..=MAX_FRAME).contains(&frame_len) {
            return Err(JournalError::BadFrame(format!(
                "implausible frame length {frame_len}"
            )));
        }
        let len = 4 + frame_len;
        if buf.len() < len {
            return Ok(Frame::Torn);
        }

        let stored = u32::from_le_bytes(le_array(buf, 4));
        if crc32c(&buf[8..len]) != stored {
            return Ok(Frame::ChecksumMismatch { len });
        }

        let record = JournalRecord {
            sequence: u64::from_le_bytes(le_array(buf, 8)),
            committed_at: i64::from_le_bytes(le_array(buf, 16)),
            kind: RecordKind::try_from(buf[24])?,
            payload: buf[4 + FRAME_HEADER..len].to_vec(),
        };
        Ok(Frame::Record { record, len })
    }
}

/// Caller has checked `at + N <= buf.len()`
fn le_array<const N: usize>(buf: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}

/// How often appended records are forced to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsyncPolicy {
    /// A commit returns only once its record is on disk
    EveryWrite,
    /// Up to N records may be lost on power failure
    EveryN(usize),
    /// Only segment switches and explicit syncs reach the disk
    OnRotation,
}

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub dir: PathBuf,
    /// Segment size that triggers a switch to the next segment (64 MiB)
    pub segment_bytes: u64,
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_bytes: 64 * 1024 * 1024,
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }
}

/// Appends records to the newest segment.
///
/// Every append reaches the OS before it returns; [`FsyncPolicy`] decides
/// when it also reaches the disk.
pub struct JournalWriter {
    config: JournalConfig,
    segment: BufWriter<File>,
    segment_index: u64,
    segment_path: PathBuf,
    segment_len: u64,
    next_sequence: u64,
    unsynced: usize,
}

impl JournalWriter {
    /// Open for appending after `last_sequence`, `None` for an empty journal.
    pub fn open(config: JournalConfig, last_sequence: Option<u64>) -> Result<Self, JournalError> {
        fs::create_dir_all(&config.dir)?;
        let segment_index = list_segments(&config.dir)?
            .last()
            .map_or(0, |segment| segment.index);
        let (segment, segment_path, segment_len) = open_segment(&config.dir, segment_index)?;

        Ok(Self {
            config,
            segment,
            segment_index,
            segment_path,
            segment_len,
            next_sequence: last_sequence.map_or(1, |seq| seq + 1),
            unsynced: 0,
        })
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn segment_path(&self) -> &Path {
        &self.segment_path
    }

    /// Append one record under the next sequence number
    pub fn append(
        &mut self,
        kind: RecordKind,
        committed_at: i64,
        payload: Vec<u8>,
    ) -> Result<JournalRecord, JournalError> {
        if self.segment_len >= self.config.segment_bytes {
            self.roll_segment()?;
        }

        let record = JournalRecord {
            sequence: self.next_sequence,
            committed_at,
            kind,
            payload,
        };
        let frame = record.encode()?;
        self.segment.write_all(&frame)?;
        self.segment.flush()?;

        self.segment_len += frame.len() as u64;
        self.next_sequence += 1;
        self.unsynced += 1;

        let due = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => self.unsynced >= n,
            FsyncPolicy::OnRotation => false,
        };
        if due {
            self.sync()?;
        }
        Ok(record)
    }

    /// Flush buffered bytes and fsync the current segment
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.segment.flush()?;
        self.segment.get_ref().sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Seal the current segment and continue in the next one
    pub fn roll_segment(&mut self) -> Result<(), JournalError> {
        self.sync()?;
        let (segment, path, len) = open_segment(&self.config.dir, self.segment_index + 1)?;
        self.segment = segment;
        self.segment_index += 1;
        self.segment_path = path;
        self.segment_len = len;
        Ok(())
    }
}

fn open_segment(dir: &Path, index: u64) -> Result<(BufWriter<File>, PathBuf, u64), JournalError> {
    let path = segment_path(dir, index);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let len = file.metadata()?.len();
    Ok((BufWriter::new(file), path, len))
}

#[derive(Debug, Clone)]
pub(crate) struct Segment {
    pub index: u64,
    pub path: PathBuf,
}

pub(crate) fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{SEGMENT_PREFIX}{index:06}{SEGMENT_EXT}"))
}

/// Segments in `dir` by ascending index. A missing directory has none.
pub(crate) fn list_segments(dir: &Path) -> io::Result<Vec<Segment>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry?;
        let index = entry.file_name().to_str().and_then(|name| {
            name.strip_prefix(SEGMENT_PREFIX)?
                .strip_suffix(SEGMENT_EXT)?
                .parse::<u64>()
                .ok()
        });
        if let Some(index) = index {
            segments.push(Segment {
                index,
                path: entry.path(),
            });
        }
    }
    segments.sort_by_key(|segment| segment.index);
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(sequence: u64) -> JournalRecord {
        JournalRecord {
            sequence,
            committed_at: 1_708_000_000_000_000_000 + sequence as i64,
            kind: RecordKind::WriteBatch,
            payload: b"batch".to_vec(),
        }
    }

    fn decoded(frame: &[u8]) -> (JournalRecord, usize) {
        match JournalRecord::decode(frame).unwrap() {
            Frame::Record { record, len } => (record, len),
            other => panic!("expected a record, got {other:?}"),
        }
    }

    #[test]
    fn test_frame_decodes_to_same_record() {
        let frame = record(7).encode().unwrap();
        let (back, len) = decoded(&frame);
        assert_eq!(back, record(7));
        assert_eq!(len, frame.len());
    }

    #[test]
    fn test_checksum_covers_header() {
        let mut frame = record(7).encode().unwrap();
        // low byte of the sequence
        frame[8] ^= 0x01;
        assert!(matches!(
            JournalRecord::decode(&frame).unwrap(),
            Frame::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn test_short_buffer_is_torn() {
        let frame = record(1).encode().unwrap();
        assert!(matches!(JournalRecord::decode(&frame[..2]).unwrap(), Frame::Torn));
        assert!(matches!(
            JournalRecord::decode(&frame[..frame.len() - 1]).unwrap(),
            Frame::Torn
        ));
    }

    #[test]
    fn test_implausible_length_is_bad_frame() {
        let frame = [3u8, 0, 0, 0, 9, 9, 9];
        assert!(matches!(
            JournalRecord::decode(&frame),
            Err(JournalError::BadFrame(_))
        ));
        assert!(matches!(
            RecordKind::try_from(9),
            Err(JournalError::UnknownKind(9))
        ));
    }

    #[test]
    fn test_append_continues_after_last_sequence() {
        let tmp = TempDir::new().unwrap();
        let mut writer = JournalWriter::open(JournalConfig::new(tmp.path()), Some(41)).unwrap();

        let first = writer.append(RecordKind::WriteBatch, 0, vec![1]).unwrap();
        let second = writer.append(RecordKind::IdReservation, 0, vec![2]).unwrap();
        assert_eq!((first.sequence, second.sequence), (42, 43));
        assert_eq!(writer.next_sequence(), 44);
    }

    #[test]
    fn test_switches_segment_at_size() {
        let tmp = TempDir::new().unwrap();
        let config = JournalConfig {
            segment_bytes: 100,
            ..JournalConfig::new(tmp.path())
        };
        let mut writer = JournalWriter::open(config, None).unwrap();
        for _ in 0..20 {
            writer.append(RecordKind::WriteBatch, 0, vec![0; 16]).unwrap();
        }

        let segments = list_segments(tmp.path()).unwrap();
        assert!(segments.len() > 1);
        assert!(segments.windows(2).all(|w| w[0].index + 1 == w[1].index));
    }

    #[test]
    fn test_reopen_appends_to_newest_segment() {
        let tmp = TempDir::new().unwrap();
        {
            let mut writer = JournalWriter::open(JournalConfig::new(tmp.path()), None).unwrap();
            writer.append(RecordKind::WriteBatch, 0, vec![1]).unwrap();
            writer.roll_segment().unwrap();
            writer.append(RecordKind::WriteBatch, 0, vec![2]).unwrap();
        }

        let writer = JournalWriter::open(JournalConfig::new(tmp.path()), Some(2)).unwrap();
        assert_eq!(writer.segment_path(), segment_path(tmp.path(), 1));
    }

    #[test]
    fn test_explicit_sync_under_lazy_policy() {
        let tmp = TempDir::new().unwrap();
        let config = JournalConfig {
            fsync_policy: FsyncPolicy::OnRotation,
            ..JournalConfig::new(tmp.path())
        };
        let mut writer = JournalWriter::open(config, None).unwrap();
        let appended = writer.append(RecordKind::WriteBatch, 0, vec![5; 8]).unwrap();
        writer.sync().unwrap();

        let on_disk = fs::read(writer.segment_path()).unwrap();
        assert_eq!(on_disk, appended.encode().unwrap());
    }

    #[test]
    fn test_segment_naming_ignores_other_files() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(
            segment_path(Path::new("/data"), 42),
            PathBuf::from("/data/segment-000042.log")
        );

        fs::write(segment_path(tmp.path(), 3), b"").unwrap();
        fs::write(tmp.path().join("segment-000004.log.damaged"), b"").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"").unwrap();
        let segments = list_segments(tmp.path()).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].index, 3);
    }
}
