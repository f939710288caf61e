//! Write-ahead log.
//!
//! Append-only journal of engine operations, one JSON record per line.
//! Every engine owns a `Wal` typed over its own record enum; an `append`
//! has fully reached stable storage (write + flush + fsync) before it
//! returns, so a record in the log is a committed operation.
//!
//! ## File format
//!
//! Newline-delimited UTF-8 JSON. Records are self-describing; blank lines
//! are skipped on replay. A truncated final record (a crash mid-append
//! leaves no trailing newline) is discarded; a parse failure on a
//! terminated record is corruption and aborts recovery.

use parking_lot::Mutex;
use polystore_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Write-ahead log handle, generic over the record type.
///
/// The internal lock serializes writes (`append`, `rotate`, `close`) so an
/// engine can hold its own state lock while taking the WAL lock briefly.
pub struct Wal<R> {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Serialize + DeserializeOwned> Wal<R> {
    /// Open an existing WAL or create a new one.
    ///
    /// Creates parent directories if they don't exist and opens the file in
    /// append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Wal {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
            _record: PhantomData,
        })
    }

    /// Durably append one record.
    ///
    /// The record is serialized, written, the buffer flushed, and the file
    /// descriptor synchronized to stable storage before this returns. A
    /// failed append is a data-loss risk for the operation it describes;
    /// callers must not apply the in-memory mutation.
    pub fn append(&self, record: &R) -> Result<()> {
        let mut line =
            serde_json::to_vec(record).map_err(|e| Error::Serialization(e.to_string()))?;
        line.push(b'\n');

        let mut guard = self.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::Io(closed_error(&self.path)))?;
        writer.write_all(&line)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Read back every previously appended record, in order.
    ///
    /// Blank lines are skipped. An unterminated trailing fragment that does
    /// not parse is a partial write and is discarded; a terminated record
    /// that does not parse is unrecoverable corruption.
    pub fn replay(&self) -> Result<Vec<R>> {
        // Flush buffered writes so a reader sees everything appended so far.
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.flush()?;
        }

        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line)?;
            if bytes_read == 0 {
                break;
            }
            let terminated = line.ends_with('\n');
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<R>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) if terminated => {
                    return Err(Error::Corrupt(format!(
                        "unreadable record in {}: {}",
                        self.path.display(),
                        e
                    )));
                }
                Err(_) => {
                    warn!(
                        path = %self.path.display(),
                        bytes = trimmed.len(),
                        "discarding truncated trailing record"
                    );
                    break;
                }
            }
        }

        debug!(path = %self.path.display(), records = records.len(), "WAL replayed");
        Ok(records)
    }

    /// Close the current file, truncate the path to empty, and reopen for
    /// append.
    ///
    /// Called after a replay once the snapshot is effectively the new
    /// baseline.
    pub fn rotate(&self) -> Result<()> {
        let mut guard = self.writer.lock();
        if let Some(mut writer) = guard.take() {
            writer.flush()?;
        }

        // Truncate, then reopen in append mode.
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        *guard = Some(BufWriter::new(file));

        debug!(path = %self.path.display(), "WAL rotated");
        Ok(())
    }

    /// Release the file handle. Further appends fail until the engine is
    /// restarted.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.writer.lock();
        if let Some(mut writer) = guard.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<R> Drop for Wal<R> {
    fn drop(&mut self) {
        // Best-effort final flush so buffered data is not lost on drop.
        if let Some(writer) = self.writer.lock().as_mut() {
            let _ = writer.flush();
            let _ = writer.get_ref().sync_all();
        }
    }
}

fn closed_error(path: &Path) -> std::io::Error {
    std::io::Error::new(
        ErrorKind::Other,
        format!("write-ahead log {} is closed", path.display()),
    )
}
