//! Append-only flat vector index — O(n) k-NN search.
//!
//! Positions are dense and zero-based in insertion order; nothing is ever
//! removed, so a position identifies the same row for the index's lifetime.
//! Snapshots are a flat binary file: [dimension: u32][count: u32] followed
//! by count rows of little-endian f32 values. Reads go through mmap when
//! available, with regular file I/O as fallback.

use crate::embedding::{l2_unchecked, Embedding};
use crate::error::{Result, SnapdexError};
use rayon::prelude::*;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Header written at the start of a snapshot file.
/// [dimension: u32][count: u32]
const HEADER_SIZE: usize = 8;

/// A flat (brute-force) index that computes distance to every stored vector.
#[derive(Debug, Default)]
pub struct FlatIndex {
    vectors: Vec<Embedding>,
    dimension: Option<usize>,
}

impl FlatIndex {
    /// Create a new empty index. The dimension locks on the first insert.
    pub fn new() -> Self {
        Self::default()
    }

    /// The locked dimension, or None while the index is empty.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Append a vector and return its position (the previous length).
    ///
    /// The first insert fixes the index dimension; later inserts with a
    /// different dimension fail without changing any state.
    pub fn insert(&mut self, embedding: Embedding) -> Result<usize> {
        match self.dimension {
            Some(dim) if embedding.dimension() != dim => {
                return Err(SnapdexError::DimensionMismatch {
                    expected: dim,
                    actual: embedding.dimension(),
                });
            }
            None => self.dimension = Some(embedding.dimension()),
            _ => {}
        }
        self.vectors.push(embedding);
        Ok(self.vectors.len() - 1)
    }

    /// Get the vector stored at a position.
    pub fn vector_at(&self, position: usize) -> Option<&Embedding> {
        self.vectors.get(position)
    }

    /// Find the k nearest vectors to the query by Euclidean distance.
    ///
    /// Results come back ascending by distance, ties broken by lower
    /// position. An empty index (or k = 0) yields an empty list; a query
    /// whose dimension differs from the locked dimension is an error.
    pub fn search(&self, query: &Embedding, k: usize) -> Result<Vec<(usize, f32)>> {
        if self.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if let Some(dim) = self.dimension {
            if query.dimension() != dim {
                return Err(SnapdexError::DimensionMismatch {
                    expected: dim,
                    actual: query.dimension(),
                });
            }
        }

        let mut results: Vec<(usize, f32)> = self
            .vectors
            .par_iter()
            .enumerate()
            .map(|(position, v)| (position, l2_unchecked(query.as_slice(), v.as_slice())))
            .collect();

        results.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        results.truncate(k);
        Ok(results)
    }

    /// Write the vector table to a snapshot file and fsync it.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let dim = self.dimension.unwrap_or(0);
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.vectors.len() * dim * 4);
        buf.extend_from_slice(&(dim as u32).to_le_bytes());
        buf.extend_from_slice(&(self.vectors.len() as u32).to_le_bytes());
        for v in &self.vectors {
            for &val in v.as_slice() {
                buf.extend_from_slice(&val.to_le_bytes());
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }

    /// Load a snapshot file, memory-mapped when possible.
    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        match unsafe { memmap2::Mmap::map(&file) } {
            Ok(mmap) => Self::decode(&mmap),
            Err(_) => {
                let bytes = std::fs::read(path)?;
                Self::decode(&bytes)
            }
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(SnapdexError::Storage(
                "index snapshot too small for header".to_string(),
            ));
        }
        let dimension = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let count = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;

        if count > 0 && dimension == 0 {
            return Err(SnapdexError::Storage(
                "index snapshot has rows but zero dimension".to_string(),
            ));
        }
        let expected = HEADER_SIZE + count * dimension * 4;
        if bytes.len() != expected {
            return Err(SnapdexError::Storage(format!(
                "index snapshot size mismatch: expected {} bytes, found {}",
                expected,
                bytes.len()
            )));
        }

        let row_bytes = dimension * 4;
        let mut vectors = Vec::with_capacity(count);
        for i in 0..count {
            let start = HEADER_SIZE + i * row_bytes;
            let data: Vec<f32> = bytes[start..start + row_bytes]
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            vectors.push(Embedding::new(data));
        }

        Ok(Self {
            vectors,
            dimension: if count == 0 { None } else { Some(dimension) },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_insert_returns_sequential_positions() {
        let mut index = FlatIndex::new();
        assert_eq!(index.insert(vec![1.0, 0.0].into()).unwrap(), 0);
        assert_eq!(index.insert(vec![0.0, 1.0].into()).unwrap(), 1);
        assert_eq!(index.insert(vec![1.0, 1.0].into()).unwrap(), 2);
        assert_eq!(index.len(), 3);
        assert_eq!(index.dimension(), Some(2));
    }

    #[test]
    fn test_dimension_locked_by_first_insert() {
        let mut index = FlatIndex::new();
        index.insert(vec![1.0, 0.0, 0.0].into()).unwrap();

        let err = index.insert(vec![1.0, 0.0].into()).unwrap_err();
        assert!(matches!(
            err,
            SnapdexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        // Rejected insert leaves no trace
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_search_nearest_first() {
        let mut index = FlatIndex::new();
        index.insert(vec![1.0, 0.0, 0.0].into()).unwrap();
        index.insert(vec![0.0, 1.0, 0.0].into()).unwrap();
        index.insert(vec![1.0, 1.0, 0.0].into()).unwrap();

        let results = index.search(&vec![1.0, 0.0, 0.0].into(), 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 0); // exact match
        assert!(results[0].1 < 1e-6);
        assert_eq!(results[1].0, 2);
    }

    #[test]
    fn test_search_ties_break_by_position() {
        let mut index = FlatIndex::new();
        index.insert(vec![3.0].into()).unwrap(); // position 0, distance 1
        index.insert(vec![1.0].into()).unwrap(); // position 1, distance 1
        index.insert(vec![2.0].into()).unwrap(); // position 2, distance 0

        let results = index.search(&vec![2.0].into(), 3).unwrap();
        let positions: Vec<usize> = results.iter().map(|r| r.0).collect();
        assert_eq!(positions, vec![2, 0, 1]);
    }

    #[test]
    fn test_search_empty_index() {
        let index = FlatIndex::new();
        // Dimension is unlocked, so any query shape is accepted
        assert!(index.search(&vec![1.0, 2.0].into(), 5).unwrap().is_empty());
    }

    #[test]
    fn test_search_k_larger_than_len() {
        let mut index = FlatIndex::new();
        index.insert(vec![0.0].into()).unwrap();
        index.insert(vec![1.0].into()).unwrap();
        let results = index.search(&vec![0.0].into(), 10).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_search_dimension_mismatch() {
        let mut index = FlatIndex::new();
        index.insert(vec![1.0, 2.0].into()).unwrap();
        assert!(matches!(
            index.search(&vec![1.0, 2.0, 3.0].into(), 1),
            Err(SnapdexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_vector_at() {
        let mut index = FlatIndex::new();
        index.insert(vec![1.0, 2.0].into()).unwrap();
        assert_eq!(index.vector_at(0).unwrap().as_slice(), &[1.0, 2.0]);
        assert!(index.vector_at(1).is_none());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.vec");

        let mut index = FlatIndex::new();
        index.insert(vec![1.5, -2.5, 0.125].into()).unwrap();
        index
            .insert(vec![f32::MIN_POSITIVE, 1e30, -0.0].into())
            .unwrap();
        index.save_snapshot(&path).unwrap();

        let loaded = FlatIndex::load_snapshot(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.dimension(), Some(3));
        for pos in 0..2 {
            // Compare raw bytes so -0.0 stays distinct from 0.0
            assert_eq!(
                loaded.vector_at(pos).unwrap().to_blob(),
                index.vector_at(pos).unwrap().to_blob()
            );
        }
    }

    #[test]
    fn test_snapshot_empty_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.vec");

        FlatIndex::new().save_snapshot(&path).unwrap();
        let loaded = FlatIndex::load_snapshot(&path).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimension(), None);
    }

    #[test]
    fn test_truncated_snapshot_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.vec");

        let mut index = FlatIndex::new();
        index.insert(vec![1.0, 2.0, 3.0].into()).unwrap();
        index.save_snapshot(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        assert!(matches!(
            FlatIndex::load_snapshot(&path),
            Err(SnapdexError::Storage(_))
        ));
    }

    #[test]
    fn test_header_only_too_small_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.vec");
        std::fs::write(&path, [0u8; 5]).unwrap();
        assert!(matches!(
            FlatIndex::load_snapshot(&path),
            Err(SnapdexError::Storage(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_search_sorted_unique_bounded(
            rows in prop::collection::vec(prop::collection::vec(-100.0f32..100.0, 4), 1..40),
            query in prop::collection::vec(-100.0f32..100.0, 4),
            k in 0usize..50,
        ) {
            let mut index = FlatIndex::new();
            for row in &rows {
                index.insert(row.clone().into()).unwrap();
            }
            let results = index.search(&query.clone().into(), k).unwrap();

            prop_assert_eq!(results.len(), k.min(rows.len()));
            for pair in results.windows(2) {
                let sorted = pair[0].1 < pair[1].1
                    || (pair[0].1 == pair[1].1 && pair[0].0 < pair[1].0);
                prop_assert!(sorted);
            }
            let unique: HashSet<usize> = results.iter().map(|r| r.0).collect();
            prop_assert_eq!(unique.len(), results.len());
        }
    }
}
