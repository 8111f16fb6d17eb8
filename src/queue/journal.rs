//! Journal file format and access.
//!
//! A journal is an append-only stream of length-prefixed records:
//! `length (uint32 big-endian) || job bytes`. Files are named
//! `journal-<n>` with `n` monotone per queue directory; `last_done`
//! holds the latest durable tail value as 8 big-endian bytes.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use super::job::Job;
use super::{QueueError, QueueResult};

pub(crate) const JOURNAL_PREFIX: &str = "journal-";
pub(crate) const LAST_DONE_FILE: &str = "last_done";
const RECORD_LEN_BYTES: usize = 4;

pub(crate) fn journal_file_name(number: u64) -> String {
    format!("{JOURNAL_PREFIX}{number}")
}

pub(crate) fn parse_journal_number(name: &str) -> Option<u64> {
    name.strip_prefix(JOURNAL_PREFIX)?.parse().ok()
}

/// Sequential reader over one journal's records.
pub(crate) struct JournalReader {
    reader: BufReader<File>,
    path: PathBuf,
}

impl JournalReader {
    pub fn open(path: &Path) -> QueueResult<Self> {
        let file = File::open(path).map_err(|source| QueueError::io(path, source))?;
        Ok(JournalReader {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
        })
    }

    /// The next record, or `None` at a clean end-of-file. A frame cut off
    /// mid-record is an error: the journal cannot be read past it.
    pub fn read_next(&mut self) -> QueueResult<Option<Job>> {
        let mut header = [0u8; RECORD_LEN_BYTES];
        match self.fill(&mut header)? {
            Filled::Complete => {}
            Filled::Empty => return Ok(None),
            Filled::Partial => {
                return Err(QueueError::PartialRecord {
                    path: self.path.clone(),
                })
            }
        }

        let length = u32::from_be_bytes(header) as usize;
        let mut body = vec![0u8; length];
        match self.fill(&mut body)? {
            Filled::Complete => {}
            Filled::Empty | Filled::Partial => {
                return Err(QueueError::PartialRecord {
                    path: self.path.clone(),
                })
            }
        }

        Ok(Some(Job::decode(&body)?))
    }

    fn fill(&mut self, buf: &mut [u8]) -> QueueResult<Filled> {
        let mut read = 0usize;
        while read < buf.len() {
            let n = self
                .reader
                .read(&mut buf[read..])
                .map_err(|source| QueueError::io(&self.path, source))?;
            if n == 0 {
                if read == 0 {
                    return Ok(Filled::Empty);
                }
                return Ok(Filled::Partial);
            }
            read += n;
        }
        Ok(Filled::Complete)
    }
}

enum Filled {
    Complete,
    Empty,
    Partial,
}

/// Append-side handle for the active write journal. Every append is
/// synced before it is acknowledged.
pub(crate) struct JournalWriter {
    file: File,
    path: PathBuf,
}

impl JournalWriter {
    pub fn create(path: &Path) -> QueueResult<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)
            .map_err(|source| QueueError::io(path, source))?;
        Ok(JournalWriter {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn append(&mut self, job: &Job) -> QueueResult<()> {
        let body = job.encode();
        let mut frame = Vec::with_capacity(RECORD_LEN_BYTES + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        self.file
            .write_all(&frame)
            .map_err(|source| QueueError::io(&self.path, source))?;
        self.file
            .sync_all()
            .map_err(|source| QueueError::io(&self.path, source))
    }
}

/// Scan a journal and return the highest record id it stores, or `None`
/// for an empty journal.
pub(crate) fn scan_latest_record(path: &Path) -> QueueResult<Option<u64>> {
    let mut reader = JournalReader::open(path)?;
    let mut latest = None;
    while let Some(job) = reader.read_next()? {
        match latest {
            Some(max) if max >= job.id() => {
                tracing::warn!(
                    path = %path.display(),
                    id = job.id(),
                    max,
                    "journal record id below an earlier record"
                );
            }
            _ => latest = Some(job.id()),
        }
    }
    Ok(latest)
}

pub(crate) fn read_last_done(dir: &Path) -> QueueResult<Option<u64>> {
    let path = dir.join(LAST_DONE_FILE);
    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(QueueError::io(path, source)),
    };
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf).map_err(|source| {
        if source.kind() == std::io::ErrorKind::UnexpectedEof {
            QueueError::PartialRecord { path: path.clone() }
        } else {
            QueueError::io(path.clone(), source)
        }
    })?;
    Ok(Some(u64::from_be_bytes(buf)))
}

/// Durably replace `last_done`: write a sibling temp file, sync it, and
/// rename it into place.
pub(crate) fn write_last_done(dir: &Path, tail: u64) -> QueueResult<()> {
    let tmp_path = dir.join(format!("{LAST_DONE_FILE}.tmp"));
    let final_path = dir.join(LAST_DONE_FILE);

    let mut file = File::create(&tmp_path).map_err(|source| QueueError::io(&tmp_path, source))?;
    file.write_all(&tail.to_be_bytes())
        .map_err(|source| QueueError::io(&tmp_path, source))?;
    file.sync_all()
        .map_err(|source| QueueError::io(&tmp_path, source))?;
    fs::rename(&tmp_path, &final_path).map_err(|source| QueueError::io(&final_path, source))?;
    fsync_dir(dir)
}

pub(crate) fn fsync_dir(dir: &Path) -> QueueResult<()> {
    let file = File::open(dir).map_err(|source| QueueError::io(dir, source))?;
    file.sync_all().map_err(|source| QueueError::io(dir, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    #[test]
    fn file_names_round_trip() {
        assert_eq!(journal_file_name(3), "journal-3");
        assert_eq!(parse_journal_number("journal-3"), Some(3));
        assert_eq!(parse_journal_number("journal-x"), None);
        assert_eq!(parse_journal_number("last_done"), None);
    }

    #[test]
    fn append_then_read_round_trips() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(journal_file_name(1));
        let mut writer = JournalWriter::create(&path).unwrap();

        let mut first = Job::new(Bytes::from_static(b"one"));
        first.set_id(0);
        let mut second = Job::new(Bytes::from_static(b"two"));
        second.set_id(1);
        writer.append(&first).unwrap();
        writer.append(&second).unwrap();

        let mut reader = JournalReader::open(&path).unwrap();
        assert_eq!(reader.read_next().unwrap(), Some(first));
        assert_eq!(reader.read_next().unwrap(), Some(second));
        assert_eq!(reader.read_next().unwrap(), None);
    }

    #[test]
    fn reader_sees_records_appended_after_eof() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(journal_file_name(1));
        let mut writer = JournalWriter::create(&path).unwrap();
        let mut reader = JournalReader::open(&path).unwrap();

        assert_eq!(reader.read_next().unwrap(), None);

        let mut job = Job::new(Bytes::from_static(b"late"));
        job.set_id(5);
        writer.append(&job).unwrap();
        assert_eq!(reader.read_next().unwrap(), Some(job));
    }

    #[test]
    fn partial_frame_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(journal_file_name(1));
        // A length header promising more bytes than the file holds.
        fs::write(&path, [0, 0, 0, 20, 1, 2, 3]).unwrap();

        let mut reader = JournalReader::open(&path).unwrap();
        let err = reader.read_next().unwrap_err();
        assert!(matches!(err, QueueError::PartialRecord { .. }));
    }

    #[test]
    fn truncated_length_header_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(journal_file_name(1));
        fs::write(&path, [0, 0]).unwrap();

        let mut reader = JournalReader::open(&path).unwrap();
        let err = reader.read_next().unwrap_err();
        assert!(matches!(err, QueueError::PartialRecord { .. }));
    }

    #[test]
    fn scan_returns_the_highest_record_id() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(journal_file_name(1));
        let mut writer = JournalWriter::create(&path).unwrap();
        for id in 3..6 {
            let mut job = Job::new(Bytes::new());
            job.set_id(id);
            writer.append(&job).unwrap();
        }

        assert_eq!(scan_latest_record(&path).unwrap(), Some(5));
        let empty = temp.path().join(journal_file_name(2));
        JournalWriter::create(&empty).unwrap();
        assert_eq!(scan_latest_record(&empty).unwrap(), None);
    }

    #[test]
    fn last_done_round_trips() {
        let temp = TempDir::new().unwrap();
        assert_eq!(read_last_done(temp.path()).unwrap(), None);
        write_last_done(temp.path(), 17).unwrap();
        assert_eq!(read_last_done(temp.path()).unwrap(), Some(17));
        write_last_done(temp.path(), 23).unwrap();
        assert_eq!(read_last_done(temp.path()).unwrap(), Some(23));
    }
}
