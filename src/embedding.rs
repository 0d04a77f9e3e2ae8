//! Embedding vectors and the L2 metric

use crate::error::{Result, SnapdexError};
use serde::{Deserialize, Serialize};

/// A dense embedding vector produced by the captioning model.
///
/// Embeddings compare by exact bit equality (`PartialEq` on `f32` here is
/// intentional): the same stored bytes must round-trip to the same vector,
/// and the index must hold exactly what the store holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    data: Vec<f32>,
}

impl Embedding {
    /// Create a new embedding from raw components
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }

    /// Get the dimension of the embedding
    pub fn dimension(&self) -> usize {
        self.data.len()
    }

    /// Get the underlying components as a slice
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Check if this embedding has the same dimension as another
    pub fn has_same_dimension(&self, other: &Embedding) -> bool {
        self.dimension() == other.dimension()
    }

    /// Euclidean (L2) distance to another embedding of the same dimension.
    ///
    /// Note this takes the square root, so reported distances are plain
    /// Euclidean. Ranking is unchanged versus squared L2.
    pub fn l2_distance(&self, other: &Embedding) -> Result<f32> {
        if !self.has_same_dimension(other) {
            return Err(SnapdexError::DimensionMismatch {
                expected: self.dimension(),
                actual: other.dimension(),
            });
        }
        Ok(l2_unchecked(self.as_slice(), other.as_slice()))
    }

    /// Encode as little-endian f32 bytes, 4 bytes per component.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(self.data.len() * 4);
        for v in &self.data {
            blob.extend_from_slice(&v.to_le_bytes());
        }
        blob
    }

    /// Decode from little-endian f32 bytes. The blob length must be a
    /// multiple of 4.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        if blob.len() % 4 != 0 {
            return Err(SnapdexError::Serialization(format!(
                "embedding blob length {} is not a multiple of 4",
                blob.len()
            )));
        }
        let data = blob
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self { data })
    }

    /// Parse an embedding from a comma-separated string
    pub fn parse(s: &str) -> Result<Self> {
        let data: Result<Vec<f32>> = s
            .split(',')
            .map(|x| {
                x.trim().parse::<f32>().map_err(|_| {
                    SnapdexError::Serialization(format!("Invalid float: {}", x))
                })
            })
            .collect();
        Ok(Embedding::new(data?))
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(data: Vec<f32>) -> Self {
        Self { data }
    }
}

/// L2 distance over raw slices, dimensions already verified by the caller.
pub(crate) fn l2_unchecked(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}
