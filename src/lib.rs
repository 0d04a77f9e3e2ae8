//! # snapdex
//!
//! A content-addressed image caption store with nearest-neighbor search.
//!
//! Images are identified by the SHA-256 of their bytes. A pluggable
//! [`provider::EmbeddingProvider`] turns image bytes into a caption and a
//! fixed-dimension embedding; the [`catalog::Catalog`] stores the record
//! durably, indexes the embedding in an append-only flat index, and keeps
//! the position-to-hash mapping consistent between the two. The record
//! store is the source of truth: the index can always be rebuilt from it.
//!
//! ## Example
//!
//! ```rust
//! use snapdex::index::FlatIndex;
//!
//! let mut index = FlatIndex::new();
//! index.insert(vec![1.0, 0.0, 0.0].into()).unwrap();
//! index.insert(vec![0.0, 1.0, 0.0].into()).unwrap();
//!
//! let results = index.search(&vec![1.0, 0.1, 0.0].into(), 1).unwrap();
//! assert_eq!(results[0].0, 0);
//! ```

pub mod catalog;
pub mod codec;
pub mod embedding;
pub mod error;
pub mod hash;
pub mod index;
pub mod metrics;
pub mod provider;
pub mod server;
pub mod store;

pub use catalog::{Catalog, CatalogConfig, IngestReport, RebuildReport, SearchHit};
pub use embedding::Embedding;
pub use error::{Result, SnapdexError};
pub use hash::ContentHash;
pub use index::FlatIndex;
pub use provider::{CaptionOutput, EmbeddingProvider};
pub use store::{ContentRecord, RecordStore};
