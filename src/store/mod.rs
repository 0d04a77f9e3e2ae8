//! Durable record store: content hash -> caption record.
//!
//! Every successful `put` reaches the write-ahead log (fsynced) before it is
//! applied in memory. `checkpoint` folds the log into a bincode snapshot.
//! Insertion order is tracked so index rebuilds see records in the order they
//! first arrived.

pub mod wal;

use crate::codec;
use crate::embedding::Embedding;
use crate::error::{Result, SnapdexError};
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use wal::{RecordWal, WalEntry};

const SNAPSHOT_FILE: &str = "records.snap";
const SNAPSHOT_TMP_FILE: &str = "records.snap.tmp";
const WAL_FILE: &str = "records.wal";

/// One stored image: its content hash, the filename it was first seen
/// under, its caption, and the embedding if one has been computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: ContentHash,
    pub filename: String,
    pub caption: String,
    pub embedding: Option<Embedding>,
}

/// Serializable full-store state, records in insertion order.
#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    records: Vec<ContentRecord>,
}

/// Durable map from content hash to record.
pub struct RecordStore {
    records: HashMap<ContentHash, ContentRecord>,
    order: Vec<ContentHash>,
    wal: RecordWal,
    dir: PathBuf,
}

impl RecordStore {
    /// Open or create a store in the given directory: load the snapshot if
    /// present, then replay the WAL tail on top of it.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut records = HashMap::new();
        let mut order = Vec::new();

        let snap_path = dir.join(SNAPSHOT_FILE);
        if snap_path.exists() {
            let bytes = fs::read(&snap_path)?;
            let snapshot: StoreSnapshot = codec::from_bincode(&bytes)?;
            for record in snapshot.records {
                Self::upsert(&mut records, &mut order, record);
            }
        }

        let wal = RecordWal::open(dir.join(WAL_FILE))?;
        for entry in wal.replay()? {
            if let WalEntry::Put(record) = entry {
                Self::upsert(&mut records, &mut order, record);
            }
        }

        Ok(Self {
            records,
            order,
            wal,
            dir,
        })
    }

    fn upsert(
        records: &mut HashMap<ContentHash, ContentRecord>,
        order: &mut Vec<ContentHash>,
        record: ContentRecord,
    ) {
        if !records.contains_key(&record.id) {
            order.push(record.id.clone());
        }
        records.insert(record.id.clone(), record);
    }

    /// Store a record, WAL-first.
    ///
    /// Fails with `DuplicateKey` when a record with this hash already holds
    /// an embedding. When the existing record has no embedding yet, the put
    /// is a backfill merge: the stored caption and filename win (first write
    /// wins) and the new record only fills blanks and supplies the
    /// embedding. Returns the record as stored.
    pub fn put(&mut self, record: ContentRecord) -> Result<ContentRecord> {
        let merged = match self.records.get(&record.id) {
            Some(existing) if existing.embedding.is_some() => {
                return Err(SnapdexError::DuplicateKey { id: record.id });
            }
            Some(existing) => ContentRecord {
                id: record.id,
                filename: if existing.filename.is_empty() {
                    record.filename
                } else {
                    existing.filename.clone()
                },
                caption: if existing.caption.is_empty() {
                    record.caption
                } else {
                    existing.caption.clone()
                },
                embedding: record.embedding,
            },
            None => record,
        };

        self.wal.append(&WalEntry::Put(merged.clone()))?;
        Self::upsert(&mut self.records, &mut self.order, merged.clone());
        Ok(merged)
    }

    /// Look up a record by content hash.
    pub fn get(&self, id: &ContentHash) -> Option<&ContentRecord> {
        self.records.get(id)
    }

    /// Whether a record with this hash exists (embedded or not).
    pub fn contains(&self, id: &ContentHash) -> bool {
        self.records.contains_key(id)
    }

    /// Iterate records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ContentRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records that carry an embedding.
    pub fn embedded_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.embedding.is_some())
            .count()
    }

    /// Write a full snapshot and truncate the WAL.
    ///
    /// The snapshot goes to a temp file, is fsynced, and is renamed over
    /// the previous snapshot before the WAL is touched. A crash at any
    /// point leaves either the old snapshot + full WAL or the new
    /// snapshot, never a torn one.
    pub fn checkpoint(&mut self) -> Result<()> {
        let snapshot = StoreSnapshot {
            records: self.iter().cloned().collect(),
        };
        let bytes = codec::to_bincode(&snapshot)?;

        let tmp_path = self.dir.join(SNAPSHOT_TMP_FILE);
        let mut tmp = fs::File::create(&tmp_path)?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, self.dir.join(SNAPSHOT_FILE))?;

        self.wal.append(&WalEntry::Checkpoint)?;
        self.wal.truncate()?;
        Ok(())
    }
}
