//! Write-ahead log for the record store.
//!
//! Each entry is written as: [length: u32][crc32: u32][payload: bincode(WalEntry)]
//! The log is append-only and fsynced after each write. A `Put` entry holds
//! the record as it stands after any backfill merge, so replay is a plain
//! upsert with no merge logic of its own.

use crate::codec;
use crate::error::{Result, SnapdexError};
use crate::store::ContentRecord;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// A single WAL entry.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum WalEntry {
    Put(ContentRecord),
    Checkpoint,
}

/// Write-ahead log file manager.
pub struct RecordWal {
    path: PathBuf,
    file: File,
}

impl RecordWal {
    /// Open (or create) a WAL file at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Append an entry to the WAL and fsync.
    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        let payload = codec::to_bincode(entry)?;
        let crc = crc32fast::hash(&payload);
        let len = payload.len() as u32;

        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(&crc.to_le_bytes())?;
        self.file.write_all(&payload)?;
        self.sync()?;

        Ok(())
    }

    /// Fsync the WAL file.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Replay all valid entries from the WAL.
    /// Stops at the first corrupted or incomplete entry (crash tolerance).
    pub fn replay(&self) -> Result<Vec<WalEntry>> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();

        loop {
            // Read length
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(SnapdexError::Io(e)),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            // Read CRC
            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(_) => break, // Truncated — stop
            }
            let expected_crc = u32::from_le_bytes(crc_buf);

            // Read payload
            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(_) => break, // Truncated — stop
            }

            // Verify CRC
            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                break; // Corrupted — stop
            }

            // Deserialize
            match codec::from_bincode::<WalEntry>(&payload) {
                Ok(entry) => entries.push(entry),
                Err(_) => break, // Corrupted — stop
            }
        }

        Ok(entries)
    }

    /// Truncate the WAL file (after a successful checkpoint).
    pub fn truncate(&mut self) -> Result<()> {
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }
}
