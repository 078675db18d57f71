//! Approximate nearest-string lookup over character-trigram vectors.
//!
//! Indexes a string collection (up to a few million entries) as L2-normalized
//! trigram frequency vectors in a sparse matrix, then answers batched queries
//! with one sparse×dense cosine-similarity product and per-query top-k
//! selection. The matrix can optionally be placed on an accelerator device;
//! queries follow the matrix, never the reverse. Raw term frequency only: no
//! IDF weighting, no smoothing.
//!
//! Queries are meant to arrive in batches of roughly a hundred; the full
//! `collection × batch` similarity block is materialized per call.
//!
//! ```
//! use trigram_lookup::{build_index, lookup, save_index, load_index};
//!
//! let strings = vec!["cat".to_string(), "cats".to_string(), "dog".to_string()];
//! let index = build_index(strings)?;
//!
//! let hits = lookup(&["cat"], &index, 2)?;
//! assert_eq!(hits[0][0].0, "cat");
//!
//! let path = std::env::temp_dir().join("trigram-lookup-doc.idx");
//! save_index(&index, &path)?;
//! let reloaded = load_index(&path)?;
//! assert_eq!(reloaded.strings(), index.strings());
//! # std::fs::remove_file(&path).ok();
//! # Ok::<(), trigram_lookup::Error>(())
//! ```

pub mod error;
pub mod index;
pub mod matrix;
pub mod persist;
pub mod search;
pub mod vectorizer;

/// Crate error type and result alias.
pub use error::{Error, Result};

/// The built index: sparse matrix, frozen vectorizer and string collection.
pub use index::IndexModel;

/// Build an index from a string collection.
pub use index::build_index;

/// Move an index's sparse matrix to a device.
pub use index::place;

/// Batched top-k cosine lookup.
pub use search::{lookup, DEFAULT_TOP_K};

/// Persist and restore an index (always host-resident on restore).
pub use persist::{load_index, save_index};

/// Residency targets and the sparse matrix store.
pub use matrix::{DeviceSpec, Residency, SparseMatrix};

/// Trigram vectorization against a vocabulary frozen at build time.
pub use vectorizer::{Normalization, TrigramVectorizer, NGRAM_WIDTH};
