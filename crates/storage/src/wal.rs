// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only write-ahead log of [`TaskEvent`]s.
//!
//! Each entry is a length-prefixed JSON record: a 4-byte big-endian length
//! followed by that many bytes of JSON. `seq` is a 1-based monotonically
//! increasing sequence number assigned at append time. On reopen, the log
//! is scanned once to determine `write_seq`; callers resume from whatever
//! `processed_seq` a snapshot last recorded.
//!
//! A log can end in a torn or corrupt entry if the process died mid-write.
//! `open` treats that as recoverable: it keeps every entry up to the last
//! clean boundary, rotates the untruncated file aside as a `.bak` (so the
//! bytes aren't silently lost), and resumes as if the tear never happened.
//! It never refuses to start over a damaged log.

use memhub_core::TaskEvent;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Backup rotation depth: `.bak`, `.bak.2`, `.bak.3`. The oldest is evicted
/// when a new corruption rotation would exceed this.
const MAX_BACKUPS: u32 = 3;

/// Flush is forced once this many entries have been buffered since the
/// last flush, so a crash never loses more than this many writes.
const FLUSH_THRESHOLD: u64 = 100;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },

    #[error("failed to encode task event: {0}")]
    Encode(#[source] serde_json::Error),
}

/// One decoded record read back from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct WalEntry {
    pub seq: u64,
    pub event: TaskEvent,
}

/// Append-only event log with a read cursor for unprocessed entries.
pub struct Wal {
    path: PathBuf,
    file: File,
    write_seq: u64,
    processed_seq: u64,
    /// Byte offset in the file where the next unprocessed entry starts.
    read_offset: u64,
    /// Entries appended since the last `flush`.
    unflushed: u64,
}

/// Result of scanning the log file for its last clean entry boundary.
struct ScanResult {
    /// Sequence number of the last fully-readable entry.
    write_seq: u64,
    /// Byte offset just past the last fully-readable entry.
    valid_len: u64,
    /// Byte offset just past `processed_seq`, within the valid prefix.
    read_offset: u64,
    /// Whether trailing bytes past `valid_len` were torn or corrupt.
    torn: bool,
}

impl Wal {
    /// Open (creating if needed) the log at `path`, scanning it to recover
    /// `write_seq`, and positioning the read cursor just after
    /// `processed_seq` (as recorded by the last snapshot).
    ///
    /// If the file's tail is torn or corrupt (a partial write that never
    /// reached a clean entry boundary), the untouched file is rotated to a
    /// `.bak` backup and the live file is truncated to its last valid
    /// entry. This never fails: a damaged tail costs at most the entries
    /// written since the last flush, not the ability to start.
    pub fn open(path: impl AsRef<Path>, processed_seq: u64) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        // Ensure the file exists before scanning.
        OpenOptions::new().create(true).append(true).open(&path).map_err(|source| WalError::Io { path: path.clone(), source })?;

        let scan = Self::scan(&path, processed_seq)?;
        if scan.torn {
            Self::rotate_backup(&path)?;
            let file = OpenOptions::new().write(true).open(&path).map_err(|source| WalError::Io { path: path.clone(), source })?;
            file.set_len(scan.valid_len).map_err(|source| WalError::Io { path: path.clone(), source })?;
        }

        let file = OpenOptions::new().read(true).append(true).open(&path).map_err(|source| WalError::Io { path: path.clone(), source })?;

        Ok(Self { path, file, write_seq: scan.write_seq, processed_seq, read_offset: scan.read_offset, unflushed: 0 })
    }

    /// Scan the file once to find the highest fully-readable seq, the byte
    /// offset just past it, and the offset just past `processed_seq`. A
    /// partial length prefix, a truncated body, or a body that fails to
    /// decode as JSON all mark the remainder as torn rather than erroring.
    fn scan(path: &Path, processed_seq: u64) -> Result<ScanResult, WalError> {
        let file = OpenOptions::new().read(true).open(path).map_err(|source| WalError::Io { path: path.to_path_buf(), source })?;
        let mut reader = BufReader::new(file);
        let mut offset = 0u64;
        let mut read_offset = 0u64;
        let mut seq = 0u64;

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(ScanResult { write_seq: seq, valid_len: offset, read_offset, torn: false });
                }
                Err(_) => return Ok(ScanResult { write_seq: seq, valid_len: offset, read_offset, torn: true }),
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut body = vec![0u8; len];
            if reader.read_exact(&mut body).is_err() {
                return Ok(ScanResult { write_seq: seq, valid_len: offset, read_offset, torn: true });
            }
            if serde_json::from_slice::<TaskEvent>(&body).is_err() {
                return Ok(ScanResult { write_seq: seq, valid_len: offset, read_offset, torn: true });
            }

            seq += 1;
            let entry_end = offset + 4 + len as u64;
            if seq <= processed_seq {
                read_offset = entry_end;
            }
            offset = entry_end;
        }
    }

    /// Rotate `path` to `path.bak`, pushing any existing backups down one
    /// slot (`.bak` -> `.bak.2` -> `.bak.3`) and evicting the oldest.
    fn rotate_backup(path: &Path) -> Result<(), WalError> {
        let oldest = backup_path(path, MAX_BACKUPS);
        if oldest.exists() {
            std::fs::remove_file(&oldest).map_err(|source| WalError::Io { path: oldest, source })?;
        }
        for gen in (1..MAX_BACKUPS).rev() {
            let from = backup_path(path, gen);
            if from.exists() {
                let to = backup_path(path, gen + 1);
                std::fs::rename(&from, &to).map_err(|source| WalError::Io { path: from, source })?;
            }
        }
        std::fs::copy(path, backup_path(path, 1)).map_err(|source| WalError::Io { path: path.to_path_buf(), source })?;
        Ok(())
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    pub fn processed_seq(&self) -> u64 {
        self.processed_seq
    }

    /// Append an event, returning its assigned sequence number. Buffered;
    /// call [`Wal::flush`] to guarantee durability, or check
    /// [`Wal::needs_flush`] to flush once a backlog has built up.
    pub fn append(&mut self, event: &TaskEvent) -> Result<u64, WalError> {
        let body = serde_json::to_vec(event).map_err(WalError::Encode)?;
        let len = (body.len() as u32).to_be_bytes();
        self.file.write_all(&len).map_err(|source| WalError::Io { path: self.path.clone(), source })?;
        self.file.write_all(&body).map_err(|source| WalError::Io { path: self.path.clone(), source })?;
        self.write_seq += 1;
        self.unflushed += 1;
        Ok(self.write_seq)
    }

    pub fn flush(&mut self) -> Result<(), WalError> {
        self.file.flush().map_err(|source| WalError::Io { path: self.path.clone(), source })?;
        self.unflushed = 0;
        Ok(())
    }

    /// Whether enough entries have been buffered since the last flush that
    /// a caller should flush now rather than wait for its usual cadence.
    pub fn needs_flush(&self) -> bool {
        self.unflushed >= FLUSH_THRESHOLD
    }

    /// Read and return the next unread entry, advancing the read cursor.
    /// Returns `None` once the cursor reaches `write_seq`, or once it hits
    /// a torn or corrupt entry (treated the same as end-of-log rather than
    /// an error: `open` already rotated any such tail aside).
    pub fn next_unprocessed(&mut self) -> Result<Option<WalEntry>, WalError> {
        let mut reader = OpenOptions::new().read(true).open(&self.path).map_err(|source| WalError::Io { path: self.path.clone(), source })?;
        reader.seek(SeekFrom::Start(self.read_offset)).map_err(|source| WalError::Io { path: self.path.clone(), source })?;

        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(_) => return Ok(None),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        if reader.read_exact(&mut body).is_err() {
            return Ok(None);
        }

        let event: TaskEvent = match serde_json::from_slice(&body) {
            Ok(event) => event,
            Err(_) => return Ok(None),
        };
        self.read_offset += 4 + len as u64;
        self.processed_seq += 1;

        Ok(Some(WalEntry { seq: self.processed_seq, event }))
    }

    /// Drain every remaining unprocessed entry at once (used at startup to
    /// replay into a freshly loaded snapshot).
    pub fn entries_after(&mut self, processed_seq: u64) -> Result<Vec<WalEntry>, WalError> {
        debug_assert_eq!(processed_seq, self.processed_seq, "entries_after expects the cursor already positioned at processed_seq");
        let mut out = Vec::new();
        while let Some(entry) = self.next_unprocessed()? {
            out.push(entry);
        }
        Ok(out)
    }

    /// Record that entries up to and including `seq` have been durably
    /// applied to a snapshot, allowing a future reopen to skip them.
    pub fn mark_processed(&mut self, seq: u64) {
        self.processed_seq = self.processed_seq.max(seq);
    }

    /// Drop every entry at or before `seq` from the file on disk, used
    /// after a snapshot has durably captured them so the log doesn't grow
    /// without bound. Rewrites the file in place.
    pub fn truncate_before(&mut self, seq: u64) -> Result<(), WalError> {
        if seq == 0 {
            return Ok(());
        }
        let mut reader = BufReader::new(OpenOptions::new().read(true).open(&self.path).map_err(|source| WalError::Io { path: self.path.clone(), source })?);
        let mut kept = Vec::new();
        let mut current_seq = 0u64;

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(_) => break,
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut body = vec![0u8; len];
            if reader.read_exact(&mut body).is_err() {
                break;
            }
            current_seq += 1;
            if current_seq > seq {
                kept.extend_from_slice(&len_buf);
                kept.extend_from_slice(&body);
            }
        }

        let tmp_path = self.path.with_extension("wal.tmp");
        std::fs::write(&tmp_path, &kept).map_err(|source| WalError::Io { path: tmp_path.clone(), source })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|source| WalError::Io { path: self.path.clone(), source })?;

        self.file = OpenOptions::new().read(true).append(true).open(&self.path).map_err(|source| WalError::Io { path: self.path.clone(), source })?;
        // Every entry at or before `seq` sat before `processed_seq`
        // (a snapshot can't capture entries the WAL hasn't replayed yet),
        // so the read cursor for anything still unprocessed is just the
        // new start of file.
        self.read_offset = 0;
        Ok(())
    }
}

fn backup_path(path: &Path, generation: u32) -> PathBuf {
    if generation == 1 {
        let mut name = path.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    } else {
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".bak.{generation}"));
        PathBuf::from(name)
    }
}
