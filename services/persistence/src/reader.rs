//! Journal scan for recovery
//!
//! Walks the segments in order and keeps the longest run of intact,
//! consecutively numbered records. The first damaged spot ends the scan:
//! a batch applied without its predecessor would leave the store diverged,
//! so nothing after it is trusted.

use crate::journal::{list_segments, Frame, JournalError, JournalRecord};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageKind {
    /// The segment ends inside a frame, typically a write cut short by a crash
    TornFrame,
    ChecksumMismatch,
    /// Length prefix no record could have
    BadFrame,
    /// An intact record whose sequence does not follow its predecessor
    SequenceGap,
}

/// Where the intact prefix of the journal ends
#[derive(Debug, Clone)]
pub struct Damage {
    pub segment: PathBuf,
    /// Byte offset of the first untrusted frame within `segment`
    pub offset: u64,
    pub kind: DamageKind,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct JournalScan {
    pub records: Vec<JournalRecord>,
    pub damage: Option<Damage>,
}

impl JournalScan {
    pub fn last_sequence(&self) -> Option<u64> {
        self.records.last().map(|record| record.sequence)
    }
}

/// Read every trusted record under `dir`.
///
/// Damage is reported, not returned as an error. A verified record of an
/// unknown kind is an error: it was written by something this build cannot
/// replay, and dropping it would lose data.
pub fn scan_journal(dir: &Path) -> Result<JournalScan, JournalError> {
    let mut scan = JournalScan::default();
    for segment in list_segments(dir)? {
        let bytes = fs::read(&segment.path)?;
        if let Some(damage) = scan_segment(&segment.path, &bytes, &mut scan.records)? {
            scan.damage = Some(damage);
            break;
        }
    }
    Ok(scan)
}

fn scan_segment(
    path: &Path,
    bytes: &[u8],
    records: &mut Vec<JournalRecord>,
) -> Result<Option<Damage>, JournalError> {
    let mut offset = 0;
    while offset < bytes.len() {
        let (kind, detail) = match JournalRecord::decode(&bytes[offset..]) {
            Ok(Frame::Record { record, len }) => {
                let expected = records.last().map_or(record.sequence, |prev| prev.sequence + 1);
                if record.sequence == expected {
                    records.push(record);
                    offset += len;
                    continue;
                }
                (
                    DamageKind::SequenceGap,
                    format!("expected sequence {expected}, found {}", record.sequence),
                )
            }
            Ok(Frame::Torn) => (
                DamageKind::TornFrame,
                format!("{} trailing bytes", bytes.len() - offset),
            ),
            Ok(Frame::ChecksumMismatch { len }) => (
                DamageKind::ChecksumMismatch,
                format!("{len} byte frame fails CRC32C"),
            ),
            Err(JournalError::BadFrame(reason)) => (DamageKind::BadFrame, reason),
            Err(err) => return Err(err),
        };

        return Ok(Some(Damage {
            segment: path.to_path_buf(),
            offset: offset as u64,
            kind,
            detail,
        }));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{segment_path, JournalConfig, JournalWriter, RecordKind};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_records(dir: &Path, last: Option<u64>, count: usize) -> Vec<JournalRecord> {
        let mut writer = JournalWriter::open(JournalConfig::new(dir), last).unwrap();
        (0..count)
            .map(|i| {
                writer
                    .append(RecordKind::WriteBatch, i as i64, vec![i as u8; 10])
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_scan_returns_records_in_order() {
        let tmp = TempDir::new().unwrap();
        let written = write_records(tmp.path(), None, 50);

        let scan = scan_journal(tmp.path()).unwrap();
        assert_eq!(scan.records, written);
        assert_eq!(scan.last_sequence(), Some(50));
        assert!(scan.damage.is_none());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        let scan = scan_journal(&tmp.path().join("absent")).unwrap();
        assert!(scan.records.is_empty());
        assert_eq!(scan.last_sequence(), None);
    }

    #[test]
    fn test_checksum_mismatch_ends_scan() {
        let tmp = TempDir::new().unwrap();
        let written = write_records(tmp.path(), None, 5);
        let frame_len = written[0].encode().unwrap().len();

        // corrupt the payload of the third record
        let path = segment_path(tmp.path(), 0);
        let mut bytes = fs::read(&path).unwrap();
        bytes[3 * frame_len - 1] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let scan = scan_journal(tmp.path()).unwrap();
        assert_eq!(scan.records.len(), 2);
        let damage = scan.damage.unwrap();
        assert_eq!(damage.kind, DamageKind::ChecksumMismatch);
        assert_eq!(damage.offset, 2 * frame_len as u64);
    }

    #[test]
    fn test_torn_tail_keeps_prefix() {
        let tmp = TempDir::new().unwrap();
        write_records(tmp.path(), None, 10);

        let torn = JournalRecord {
            sequence: 11,
            committed_at: 0,
            kind: RecordKind::WriteBatch,
            payload: vec![0; 32],
        }
        .encode()
        .unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(segment_path(tmp.path(), 0))
            .unwrap();
        file.write_all(&torn[..torn.len() / 2]).unwrap();

        let scan = scan_journal(tmp.path()).unwrap();
        assert_eq!(scan.records.len(), 10);
        assert_eq!(scan.damage.unwrap().kind, DamageKind::TornFrame);
    }

    #[test]
    fn test_sequence_gap_ends_scan() {
        let tmp = TempDir::new().unwrap();
        write_records(tmp.path(), None, 3);
        // a writer resumed past records that were never written
        write_records(tmp.path(), Some(9), 2);

        let scan = scan_journal(tmp.path()).unwrap();
        assert_eq!(scan.last_sequence(), Some(3));
        let damage = scan.damage.unwrap();
        assert_eq!(damage.kind, DamageKind::SequenceGap);
        assert!(damage.detail.contains("found 10"));
    }

    #[test]
    fn test_scan_spans_segments() {
        let tmp = TempDir::new().unwrap();
        let config = JournalConfig {
            segment_bytes: 128,
            ..JournalConfig::new(tmp.path())
        };
        let mut writer = JournalWriter::open(config, None).unwrap();
        for _ in 0..30 {
            writer.append(RecordKind::IdReservation, 0, vec![1; 20]).unwrap();
        }

        let scan = scan_journal(tmp.path()).unwrap();
        assert_eq!(scan.records.len(), 30);
        assert!(scan.records.windows(2).all(|w| w[1].sequence == w[0].sequence + 1));
        assert!(segment_path(tmp.path(), 1).exists());
    }
}
