//! Incremental synchronisation of a source tree into a chunk manifest and
//! a vector index.
//!
//! This crate provides:
//! - Content fingerprinting and a canonical directory-structure listing
//! - Change detection against a persisted fingerprint cache
//! - Bounded parallel extraction and enrichment of changed units
//! - Manifest reconciliation by retract-and-replace per unit
//! - Vector index reconciliation (local JSON, Qdrant, or in-memory)
//! - Atomic persistence of the cache and manifest for the next run

pub mod cache;
pub mod changeset;
pub mod chunk;
pub mod dispatch;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod ignore_rules;
pub mod manifest;
pub mod reconcile_index;
pub mod scan;
pub mod state;
pub mod vector_index;

// Re-exports
pub use cache::FingerprintCache;
pub use changeset::ChangeSet;
pub use chunk::{detect_language, Chunk};
pub use dispatch::{default_workers, DispatchConfig, DispatchOutcome, Dispatcher, UnitFailure};
pub use embeddings::{EmbeddingError, EmbeddingProvider, OllamaEmbeddings};
pub use engine::{EngineConfig, SyncEngine, SyncOutcome, SyncReport};
pub use error::{ExtractError, StateError, SyncError};
pub use extract::{
    EnrichingExtractor, Enricher, Enrichment, ExtractedSpan, OllamaEnricher, OllamaEnricherConfig,
    ParagraphSplitter, RawSpan, Splitter, UnitExtractor,
};
pub use fingerprint::{fingerprint, fingerprint_file};
pub use ignore_rules::{GitignoreRules, IgnoreRules, NoIgnore};
pub use manifest::{reconcile, Manifest, Reconciliation};
pub use reconcile_index::{apply_to_index, IndexOutcome};
pub use scan::{scan_tree, ScanOutcome, DEFAULT_BINARY_EXTENSIONS};
pub use state::{StateStore, TreeId};
pub use vector_index::{
    IndexEntry, LocalVectorIndex, MemoryVectorIndex, QdrantConfig, QdrantVectorIndex, VectorIndex,
};

/// Identity of the synthetic unit describing the directory structure.
pub const TREE_UNIT: &str = "<directory-structure>";

/// Language tag carried by the directory-structure chunk.
pub const TREE_LANG: &str = "tree";
