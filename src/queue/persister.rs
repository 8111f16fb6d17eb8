//! Journaled single-owner queue persister.
//!
//! Not safe for concurrent access: exactly one coordinator (the
//! [`JobQueue`](super::JobQueue) owner loop) may touch it. Push appends to
//! the write journal and get reads from the same files, so a push made
//! before an empty get is visible to the next get.

use std::fs;
use std::path::{Path, PathBuf};

use super::job::Job;
use super::journal::{
    journal_file_name, parse_journal_number, read_last_done, scan_latest_record, write_last_done,
    JournalReader, JournalWriter,
};
use super::window::AckWindow;
use super::{QueueError, QueueResult};

struct JournalEntry {
    number: u64,
    path: PathBuf,
    /// Highest record id stored, or `None` for an empty journal. The
    /// journal is deletable once this falls below the queue tail.
    latest_record: Option<u64>,
}

/// Append-only journaled persister with a sliding acknowledgement window.
///
/// Ids are assigned densely from `head`; `tail` is the lowest
/// unacknowledged id and is durably mirrored in the `last_done` file.
/// Jobs acknowledged out of order park in the window until the prefix
/// below them completes.
pub struct JournalPersister {
    dir: PathBuf,
    head: u64,
    tail: u64,
    window: AckWindow,
    journals: Vec<JournalEntry>,
    write_number: u64,
    read_number: u64,
    reader: Option<JournalReader>,
    writer: JournalWriter,
}

impl JournalPersister {
    /// Open (or create) the queue directory `<root>/<name>`, recover
    /// `tail` from `last_done` and `head` from the journal scan, drop
    /// fully acknowledged journals, and start a fresh write journal.
    pub fn open(root: &Path, name: &str) -> QueueResult<Self> {
        let dir = root.join(name);
        fs::create_dir_all(&dir).map_err(|source| QueueError::io(&dir, source))?;

        let mut journals = Vec::new();
        let mut max_number = 0u64;
        let listing = fs::read_dir(&dir).map_err(|source| QueueError::io(&dir, source))?;
        for entry in listing {
            let entry = entry.map_err(|source| QueueError::io(&dir, source))?;
            let file_type = entry
                .file_type()
                .map_err(|source| QueueError::io(&dir, source))?;
            if !file_type.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(number) = file_name.to_str().and_then(parse_journal_number) else {
                continue;
            };
            let path = entry.path();
            let latest_record = scan_latest_record(&path)?;
            max_number = max_number.max(number);
            journals.push(JournalEntry {
                number,
                path,
                latest_record,
            });
        }
        journals.sort_by_key(|entry| entry.number);

        let tail = read_last_done(&dir)?.unwrap_or(0);
        let head = journals
            .iter()
            .filter_map(|entry| entry.latest_record)
            .max()
            .map(|latest| latest + 1)
            .unwrap_or(0)
            .max(tail);

        let write_number = max_number + 1;
        let write_path = dir.join(journal_file_name(write_number));
        let writer = JournalWriter::create(&write_path)?;
        journals.push(JournalEntry {
            number: write_number,
            path: write_path,
            latest_record: None,
        });

        let mut persister = JournalPersister {
            dir,
            head,
            tail,
            window: AckWindow::new(),
            journals,
            write_number,
            read_number: 0,
            reader: None,
            writer,
        };
        persister.prune();
        // Earliest surviving journal still holds records >= tail.
        persister.read_number = persister
            .journals
            .first()
            .map(|entry| entry.number)
            .unwrap_or(write_number);
        Ok(persister)
    }

    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn tail(&self) -> u64 {
        self.tail
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn window_bits(&self) -> Vec<bool> {
        self.window.bits()
    }

    /// Assign the next id and append the job to the write journal. The id
    /// is consumed even if the append fails; at-least-once delivery
    /// permits the hole, and the caller observes the error.
    pub fn push(&mut self, job: &mut Job) -> QueueResult<()> {
        job.set_id(self.head);
        self.head += 1;
        self.writer.append(job)?;
        if let Some(entry) = self
            .journals
            .iter_mut()
            .find(|entry| entry.number == self.write_number)
        {
            entry.latest_record = Some(job.id());
        }
        Ok(())
    }

    /// The next undelivered job, or `None` when the queue is drained.
    /// Advances across journals in number order; records acknowledged
    /// before a restart are skipped.
    pub fn get(&mut self) -> QueueResult<Option<Job>> {
        loop {
            if self.reader.is_none() {
                let Some(entry) = self
                    .journals
                    .iter()
                    .find(|entry| entry.number >= self.read_number)
                else {
                    return Ok(None);
                };
                self.read_number = entry.number;
                self.reader = Some(JournalReader::open(&entry.path)?);
            }
            let reader = self.reader.as_mut().expect("reader just opened");
            match reader.read_next()? {
                Some(job) => {
                    if job.id() < self.tail {
                        continue;
                    }
                    self.window.extend_pending();
                    return Ok(Some(job));
                }
                None => {
                    if self.read_number == self.write_number {
                        // Caught up; future pushes appear right here.
                        return Ok(None);
                    }
                    self.read_number += 1;
                    self.reader = None;
                }
            }
        }
    }

    /// Acknowledge a delivered job. Ids outside the window are ignored.
    /// When the acknowledged prefix grows, the window slides, `tail`
    /// advances durably, and fully acknowledged journals are pruned.
    pub fn done(&mut self, job: &Job) -> QueueResult<()> {
        let index = match job.id().checked_sub(self.tail) {
            Some(offset) if (offset as usize) < self.window.len() => offset as usize,
            _ => {
                tracing::debug!(id = job.id(), tail = self.tail, "ignoring ack outside window");
                return Ok(());
            }
        };
        self.window.ack(index);
        let advanced = self.window.slide();
        if advanced > 0 {
            self.tail += advanced as u64;
            write_last_done(&self.dir, self.tail)?;
            self.prune();
        }
        Ok(())
    }

    // Delete journals whose every record is acknowledged. The write
    // journal is never pruned; a journal that fails to delete is retried
    // on the next slide.
    fn prune(&mut self) {
        let tail = self.tail;
        let write_number = self.write_number;
        let mut kept = Vec::with_capacity(self.journals.len());
        let mut dropped_read_journal = false;
        for entry in self.journals.drain(..) {
            let fully_acked = entry.number != write_number
                && entry.latest_record.map_or(true, |latest| latest < tail);
            if !fully_acked {
                kept.push(entry);
                continue;
            }
            if let Err(err) = fs::remove_file(&entry.path) {
                tracing::warn!(
                    path = %entry.path.display(),
                    "failed to remove acknowledged journal: {err}"
                );
                kept.push(entry);
                continue;
            }
            if entry.number == self.read_number {
                dropped_read_journal = true;
            }
        }
        self.journals = kept;
        if dropped_read_journal {
            self.reader = None;
        }
    }
}
