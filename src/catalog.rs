//! The catalog: one object that keeps the record store, the flat index,
//! and the position -> hash entry list in lockstep.
//!
//! Shared as `Arc<Catalog>`; interior state sits behind a single `RwLock`.
//! Searches take the read lock. Ingestion hashes and dedup-checks under the
//! read lock, calls the provider with no lock held, then performs the
//! store-put, index-insert, and entry-append as one write-locked section.
//! When two ingests race on the same bytes the first writer wins and the
//! loser gets the stored record back as a dedup hit.

use crate::codec;
use crate::embedding::Embedding;
use crate::error::{Result, SnapdexError};
use crate::hash::ContentHash;
use crate::index::FlatIndex;
use crate::provider::EmbeddingProvider;
use crate::store::{ContentRecord, RecordStore};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

const INDEX_FILE: &str = "index.vec";
const KEYS_FILE: &str = "index.keys";
const MANIFEST_FILE: &str = "manifest.json";

/// Catalog configuration.
pub struct CatalogConfig {
    /// Save a full snapshot after this many successful ingests.
    pub snapshot_every: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self { snapshot_every: 100 }
    }
}

/// What an ingest did: the record as stored, and whether it was already
/// present (in which case nothing changed and no provider call was made
/// by the winning path).
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub record: ContentRecord,
    pub deduped: bool,
}

/// One search result, resolved back to its record.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub hash: ContentHash,
    pub filename: String,
    pub caption: String,
    pub distance: f32,
}

/// Outcome of a rebuild: rows indexed, records skipped for dimension
/// mismatch. Records without an embedding are not candidates and count
/// as neither.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub indexed: usize,
    pub skipped: usize,
}

/// Catalog counters for the stats surface.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub records: usize,
    pub embedded: usize,
    pub indexed: usize,
    pub dimension: Option<usize>,
}

/// The state guarded by the catalog lock. `entries[p]` names the record
/// whose embedding sits at index position `p`; `positions` is the reverse
/// view. Store, index, and entries only change together, under the write
/// lock.
struct CatalogInner {
    store: RecordStore,
    index: FlatIndex,
    entries: Vec<ContentHash>,
    positions: HashMap<ContentHash, usize>,
    writes_since_save: usize,
}

impl CatalogInner {
    /// Discard the index and entry list and re-derive both from the store,
    /// in insertion order. The first embedded record fixes the dimension;
    /// later records with a different dimension are skipped and reported.
    fn rebuild(&mut self) -> RebuildReport {
        let mut index = FlatIndex::new();
        let mut entries = Vec::new();
        let mut positions = HashMap::new();
        let mut skipped = 0;

        for record in self.store.iter() {
            let embedding = match &record.embedding {
                Some(e) => e.clone(),
                None => continue,
            };
            match index.insert(embedding) {
                Ok(position) => {
                    entries.push(record.id.clone());
                    positions.insert(record.id.clone(), position);
                }
                Err(e) => {
                    warn!(hash = %record.id, error = %e, "skipping record during rebuild");
                    skipped += 1;
                }
            }
        }

        let indexed = index.len();
        self.index = index;
        self.entries = entries;
        self.positions = positions;
        RebuildReport { indexed, skipped }
    }

    /// Write everything to disk: store checkpoint, index pair, manifest.
    fn persist(&mut self, dir: &Path) -> Result<()> {
        self.store.checkpoint()?;
        self.index.save_snapshot(dir.join(INDEX_FILE))?;
        let keys = codec::to_bincode(&self.entries)?;
        fs::write(dir.join(KEYS_FILE), &keys)?;

        let manifest = serde_json::json!({
            "records": self.store.len(),
            "embedded": self.store.embedded_count(),
            "indexed": self.index.len(),
            "dimension": self.index.dimension(),
        });
        let manifest_bytes = codec::to_json_pretty(&manifest)?;
        fs::write(dir.join(MANIFEST_FILE), &manifest_bytes)?;

        self.writes_since_save = 0;
        Ok(())
    }

    /// Resolve raw index results to records. A position that cannot be
    /// resolved points at a hole the next rebuild will repair; it is
    /// skipped with a warning rather than failing the whole search.
    fn resolve_hits(&self, raw: Vec<(usize, f32)>) -> Vec<SearchHit> {
        let mut hits = Vec::with_capacity(raw.len());
        for (position, distance) in raw {
            let hash = match self.entries.get(position) {
                Some(h) => h,
                None => {
                    warn!(position, "index position has no entry; skipping");
                    continue;
                }
            };
            let record = match self.store.get(hash) {
                Some(r) => r,
                None => {
                    warn!(position, hash = %hash, "entry hash has no record; skipping");
                    continue;
                }
            };
            hits.push(SearchHit {
                hash: hash.clone(),
                filename: record.filename.clone(),
                caption: record.caption.clone(),
                distance,
            });
        }
        hits
    }
}

/// Content-addressed caption store with nearest-neighbor search.
pub struct Catalog {
    inner: RwLock<CatalogInner>,
    dir: PathBuf,
    snapshot_every: usize,
}

impl Catalog {
    /// Open or create a catalog at the given directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(dir, CatalogConfig::default())
    }

    /// Open or create a catalog with explicit configuration.
    ///
    /// The store opens first (snapshot + WAL replay). The index pair is
    /// then loaded and cross-checked against the store; if it is missing,
    /// torn, or disagrees with the store, the index is rebuilt from the
    /// store and saved back. Records the index has never seen are fine —
    /// they stay unindexed until the next rebuild.
    pub fn open_with(dir: impl AsRef<Path>, config: CatalogConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let store = RecordStore::open(&dir)?;

        let mut inner = CatalogInner {
            store,
            index: FlatIndex::new(),
            entries: Vec::new(),
            positions: HashMap::new(),
            writes_since_save: 0,
        };

        match Self::load_index_pair(&dir) {
            Ok(Some((index, entries)))
                if Self::pair_consistent(&inner.store, &index, &entries) =>
            {
                inner.positions = entries
                    .iter()
                    .cloned()
                    .enumerate()
                    .map(|(position, hash)| (hash, position))
                    .collect();
                inner.index = index;
                inner.entries = entries;
            }
            Ok(Some(_)) => {
                warn!("index files disagree with the record store; rebuilding");
                inner.rebuild();
                inner.persist(&dir)?;
            }
            Ok(None) => {
                if inner.store.embedded_count() > 0 {
                    warn!(
                        records = inner.store.len(),
                        "index files missing; rebuilding from the record store"
                    );
                    inner.rebuild();
                    inner.persist(&dir)?;
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to load index files; rebuilding");
                inner.rebuild();
                inner.persist(&dir)?;
            }
        }

        Ok(Self {
            inner: RwLock::new(inner),
            dir,
            snapshot_every: config.snapshot_every,
        })
    }

    fn load_index_pair(dir: &Path) -> Result<Option<(FlatIndex, Vec<ContentHash>)>> {
        let vec_path = dir.join(INDEX_FILE);
        let keys_path = dir.join(KEYS_FILE);
        match (vec_path.exists(), keys_path.exists()) {
            (false, false) => Ok(None),
            (true, true) => {
                let index = FlatIndex::load_snapshot(&vec_path)?;
                let bytes = fs::read(&keys_path)?;
                let entries: Vec<ContentHash> = codec::from_bincode(&bytes)?;
                Ok(Some((index, entries)))
            }
            _ => Err(SnapdexError::Storage(
                "index snapshot pair is incomplete".to_string(),
            )),
        }
    }

    /// The loaded pair is usable when every position maps to a distinct
    /// hash whose stored embedding equals the indexed vector bit for bit.
    /// The store may hold records the index has never seen; that is not
    /// an inconsistency.
    fn pair_consistent(store: &RecordStore, index: &FlatIndex, entries: &[ContentHash]) -> bool {
        if entries.len() != index.len() {
            return false;
        }
        let mut seen = HashSet::with_capacity(entries.len());
        for (position, hash) in entries.iter().enumerate() {
            if !seen.insert(hash) {
                return false;
            }
            let vector = match index.vector_at(position) {
                Some(v) => v,
                None => return false,
            };
            // Byte-level comparison: NaN payloads and -0.0 must compare
            // equal to themselves, or a stored NaN would force a rebuild
            // on every open.
            match store.get(hash).and_then(|r| r.embedding.as_ref()) {
                Some(stored) if stored.to_blob() == vector.to_blob() => {}
                _ => return false,
            }
        }
        true
    }

    fn read_inner(&self) -> Result<RwLockReadGuard<'_, CatalogInner>> {
        self.inner
            .read()
            .map_err(|_| SnapdexError::Storage("catalog lock poisoned".to_string()))
    }

    fn write_inner(&self) -> Result<RwLockWriteGuard<'_, CatalogInner>> {
        self.inner
            .write()
            .map_err(|_| SnapdexError::Storage("catalog lock poisoned".to_string()))
    }

    /// Ingest one image: hash it, dedup, caption and embed via the
    /// provider, store the record, and index its embedding.
    ///
    /// The provider runs with no lock held. If the record lands in the
    /// store but the index rejects its embedding, the error carries the
    /// stored record; the caption is durable and the next rebuild repairs
    /// the index.
    pub async fn ingest(
        &self,
        bytes: &[u8],
        filename: &str,
        provider: &dyn EmbeddingProvider,
    ) -> Result<IngestReport> {
        let hash = ContentHash::of(bytes);

        {
            let inner = self.read_inner()?;
            if let Some(existing) = inner.store.get(&hash) {
                if existing.embedding.is_some() {
                    return Ok(IngestReport {
                        record: existing.clone(),
                        deduped: true,
                    });
                }
            }
        }

        let output = provider.embed_image(bytes, filename).await?;

        let mut inner = self.write_inner()?;

        let record = ContentRecord {
            id: hash,
            filename: filename.to_string(),
            caption: output.caption.unwrap_or_default(),
            embedding: Some(output.embedding),
        };

        let stored = match inner.store.put(record) {
            Ok(stored) => stored,
            // Another ingest of the same bytes won the race while the
            // provider was running; its record stands.
            Err(SnapdexError::DuplicateKey { id }) => {
                let existing = inner.store.get(&id).cloned().ok_or_else(|| {
                    SnapdexError::Storage("record disappeared during ingest".to_string())
                })?;
                return Ok(IngestReport {
                    record: existing,
                    deduped: true,
                });
            }
            Err(e) => return Err(e),
        };

        let embedding = match stored.embedding.clone() {
            Some(e) => e,
            None => {
                return Err(SnapdexError::Storage(
                    "stored record lost its embedding".to_string(),
                ))
            }
        };

        let position = match inner.index.insert(embedding) {
            Ok(position) => position,
            Err(e) => {
                return Err(SnapdexError::IndexSync {
                    record: Box::new(stored),
                    detail: e.to_string(),
                });
            }
        };
        inner.entries.push(stored.id.clone());
        inner.positions.insert(stored.id.clone(), position);

        inner.writes_since_save += 1;
        if inner.writes_since_save >= self.snapshot_every {
            // The WAL already made this write durable; a failed snapshot
            // only delays compaction.
            if let Err(e) = inner.persist(&self.dir) {
                warn!(error = %e, "periodic save failed");
            }
        }

        Ok(IngestReport {
            record: stored,
            deduped: false,
        })
    }

    /// k-NN search with a raw query vector.
    pub fn search(&self, query: &Embedding, k: usize) -> Result<Vec<SearchHit>> {
        let inner = self.read_inner()?;
        let raw = inner.index.search(query, k)?;
        Ok(inner.resolve_hits(raw))
    }

    /// k-NN search seeded by a stored record's own embedding.
    ///
    /// An unknown hash is `NotFound`. A record that exists but has no
    /// embedding, or is not in the index, is reported as out of sync so
    /// the caller can trigger a rebuild.
    pub fn search_by_hash(&self, hash: &ContentHash, k: usize) -> Result<Vec<SearchHit>> {
        let inner = self.read_inner()?;
        let record = inner
            .store
            .get(hash)
            .ok_or_else(|| SnapdexError::NotFound { id: hash.clone() })?;

        let embedding = match &record.embedding {
            Some(e) => e.clone(),
            None => {
                return Err(SnapdexError::IndexSync {
                    record: Box::new(record.clone()),
                    detail: "record has no embedding".to_string(),
                });
            }
        };
        if !inner.positions.contains_key(hash) {
            return Err(SnapdexError::IndexSync {
                record: Box::new(record.clone()),
                detail: "record is not indexed; run a rebuild".to_string(),
            });
        }

        let raw = inner.index.search(&embedding, k)?;
        Ok(inner.resolve_hits(raw))
    }

    /// k-NN search for a text query, embedded by the provider.
    pub async fn search_by_text(
        &self,
        text: &str,
        k: usize,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Vec<SearchHit>> {
        let query = provider.embed_text(text).await?;
        self.search(&query, k)
    }

    /// k-NN search for an image, given as raw bytes.
    ///
    /// A known, embedded image reuses its stored embedding and never calls
    /// the provider. An unknown image either goes through a full ingest
    /// first (`store = true`) or is embedded transiently (`store = false`).
    pub async fn search_by_image(
        &self,
        bytes: &[u8],
        filename: &str,
        k: usize,
        store: bool,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Vec<SearchHit>> {
        let hash = ContentHash::of(bytes);

        {
            let inner = self.read_inner()?;
            if let Some(embedding) = inner.store.get(&hash).and_then(|r| r.embedding.clone()) {
                let raw = inner.index.search(&embedding, k)?;
                return Ok(inner.resolve_hits(raw));
            }
        }

        if store {
            let report = self.ingest(bytes, filename, provider).await?;
            let embedding = match report.record.embedding {
                Some(e) => e,
                None => {
                    return Err(SnapdexError::Storage(
                        "ingested record has no embedding".to_string(),
                    ))
                }
            };
            self.search(&embedding, k)
        } else {
            let output = provider.embed_image(bytes, filename).await?;
            self.search(&output.embedding, k)
        }
    }

    /// Rebuild the index and entry list from the store, then persist.
    /// This is the repair path for records stranded outside the index.
    pub fn rebuild_from_store(&self) -> Result<RebuildReport> {
        let mut inner = self.write_inner()?;
        let report = inner.rebuild();
        inner.persist(&self.dir)?;
        Ok(report)
    }

    /// Snapshot everything to disk now.
    pub fn save(&self) -> Result<()> {
        let mut inner = self.write_inner()?;
        inner.persist(&self.dir)
    }

    /// Look up a stored record by hash.
    pub fn record(&self, hash: &ContentHash) -> Result<ContentRecord> {
        let inner = self.read_inner()?;
        inner
            .store
            .get(hash)
            .cloned()
            .ok_or_else(|| SnapdexError::NotFound { id: hash.clone() })
    }

    /// The index position of a hash, if it is indexed.
    pub fn indexed_position(&self, hash: &ContentHash) -> Result<Option<usize>> {
        Ok(self.read_inner()?.positions.get(hash).copied())
    }

    /// The vector stored at an index position.
    pub fn indexed_vector(&self, position: usize) -> Result<Option<Embedding>> {
        Ok(self.read_inner()?.index.vector_at(position).cloned())
    }

    /// Current counters.
    pub fn stats(&self) -> Result<CatalogStats> {
        let inner = self.read_inner()?;
        Ok(CatalogStats {
            records: inner.store.len(),
            embedded: inner.store.embedded_count(),
            indexed: inner.index.len(),
            dimension: inner.index.dimension(),
        })
    }
}
