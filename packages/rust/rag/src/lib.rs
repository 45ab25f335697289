//! Retrieval layer: document ingestion, chunking, embedding and search.
//!
//! [`ChunkStore`] owns the persisted index; pipeline code depends only on
//! the [`Retriever`] capability so tests can substitute canned passages.

pub mod document;
pub mod embedder;
pub mod splitter;
pub mod store;

pub use document::Document;
pub use embedder::{Embedder, HashingEmbedder, cosine_distance};
pub use splitter::TextSplitter;
pub use store::{ChunkStore, Retriever};
