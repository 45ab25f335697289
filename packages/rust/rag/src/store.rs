//! Chunk store and nearest-neighbour retrieval.

use std::collections::HashSet;
use std::future::Future;

use specweaver_shared::{
    ChunkingConfig, IndexMode, IndexSummary, Result, RetrievalHit, RetrievalResult, Segment,
    SpecWeaverError,
};
use specweaver_storage::{DocumentRecord, Storage};
use tracing::{debug, info, instrument};

use crate::document::Document;
use crate::embedder::{Embedder, HashingEmbedder, cosine_distance};
use crate::splitter::TextSplitter;

/// Anything that can answer "which passages are most relevant to this query".
pub trait Retriever {
    fn retrieve(&self, query: &str, k: usize) -> impl Future<Output = Result<RetrievalResult>>;
}

impl<R: Retriever> Retriever for &R {
    fn retrieve(&self, query: &str, k: usize) -> impl Future<Output = Result<RetrievalResult>> {
        (**self).retrieve(query, k)
    }
}

/// Persistent chunk index over a [`Storage`] handle.
///
/// Segment ids come from a counter owned by this instance, seeded from the
/// highest id on disk, so ids never repeat while the store is open.
pub struct ChunkStore<E = HashingEmbedder> {
    storage: Storage,
    embedder: E,
    splitter: TextSplitter,
    mode: IndexMode,
    next_id: i64,
}

impl<E: Embedder> ChunkStore<E> {
    pub async fn open(storage: Storage, embedder: E, config: &ChunkingConfig) -> Result<Self> {
        let splitter = TextSplitter::new(config)?;
        let next_id = storage.max_chunk_id().await?.map_or(1, |id| id + 1);
        debug!(next_id, mode = ?config.index_mode, "opened chunk store");
        Ok(Self {
            storage,
            embedder,
            splitter,
            mode: config.index_mode,
            next_id,
        })
    }

    pub fn mode(&self) -> IndexMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: IndexMode) {
        self.mode = mode;
    }

    /// Id the next inserted segment will receive.
    pub fn next_id(&self) -> i64 {
        self.next_id
    }

    /// Split, embed and store a document.
    #[instrument(skip_all, fields(document = %document.name, mode = ?self.mode))]
    pub async fn index(&mut self, document: &Document) -> Result<IndexSummary> {
        let text = document.full_text()?;
        let chunks = self.splitter.split(&text);
        if chunks.is_empty() {
            return Err(SpecWeaverError::EmptyDocument {
                document: document.name.clone(),
            });
        }

        let first_position = match self.mode {
            IndexMode::Replace => 0,
            IndexMode::Append => self
                .storage
                .max_position(&document.name)
                .await?
                .map_or(0, |p| p + 1),
        };

        let segments: Vec<Segment> = chunks
            .into_iter()
            .enumerate()
            .map(|(offset, text)| Segment {
                id: self.next_id + offset as i64,
                document_name: document.name.clone(),
                position_index: first_position + offset as i64,
                embedding: self.embedder.embed(&text),
                text,
            })
            .collect();

        let chunks_replaced = match self.mode {
            IndexMode::Replace => {
                self.storage
                    .replace_document_chunks(&document.name, &segments)
                    .await?
            }
            IndexMode::Append => {
                self.storage.insert_chunks(&segments).await?;
                0
            }
        };
        self.next_id += segments.len() as i64;

        let document_chunks = first_position as usize + segments.len();
        self.storage
            .upsert_document(&document.name, document.pages.len(), document_chunks)
            .await?;

        let summary = IndexSummary {
            chunks_added: segments.len(),
            chunks_replaced,
            total_chunks: self.storage.count_chunks().await?,
        };
        info!(
            added = summary.chunks_added,
            replaced = summary.chunks_replaced,
            total = summary.total_chunks,
            "document indexed"
        );
        Ok(summary)
    }

    /// Up to `k` nearest chunks by cosine distance, closest first.
    ///
    /// Equal distances are ordered by segment id and repeated texts are
    /// kept only at their best rank.
    #[instrument(skip_all, fields(k = k))]
    pub async fn search(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        let segments = self.storage.load_segments().await?;
        if segments.is_empty() {
            return Err(SpecWeaverError::EmptyIndex);
        }

        let query_vector = self.embedder.embed(query);
        let mut scored = Vec::with_capacity(segments.len());
        for segment in segments {
            if segment.embedding.len() != query_vector.len() {
                return Err(SpecWeaverError::validation(format!(
                    "segment {} has {} dimensions but the embedder produces {}; re-index the documents",
                    segment.id,
                    segment.embedding.len(),
                    query_vector.len()
                )));
            }
            let distance = cosine_distance(&query_vector, &segment.embedding);
            scored.push((distance, segment));
        }
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.id.cmp(&b.1.id)));

        let mut seen = HashSet::new();
        let hits: Vec<RetrievalHit> = scored
            .into_iter()
            .filter(|(_, segment)| seen.insert(segment.text.clone()))
            .take(k)
            .map(|(distance, segment)| RetrievalHit {
                segment_id: segment.id,
                document_name: segment.document_name,
                text: segment.text,
                distance,
            })
            .collect();

        debug!(hits = hits.len(), "search complete");
        Ok(RetrievalResult {
            query: query.to_string(),
            hits,
        })
    }

    /// Remove every chunk. The id counter keeps counting.
    pub async fn clear(&mut self) -> Result<usize> {
        let removed = self.storage.clear().await?;
        info!(removed, "chunk store cleared");
        Ok(removed)
    }

    pub async fn count(&self) -> Result<usize> {
        self.storage.count_chunks().await
    }

    pub async fn documents(&self) -> Result<Vec<DocumentRecord>> {
        self.storage.list_documents().await
    }
}

impl<E: Embedder> Retriever for ChunkStore<E> {
    fn retrieve(&self, query: &str, k: usize) -> impl Future<Output = Result<RetrievalResult>> {
        self.search(query, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn test_store(config: &ChunkingConfig) -> ChunkStore {
        let tmp = std::env::temp_dir().join(format!("sw_store_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&tmp).await.expect("open test db");
        ChunkStore::open(storage, HashingEmbedder::new(128), config)
            .await
            .expect("open store")
    }

    fn small_chunks() -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: 120,
            chunk_overlap: 20,
            ..ChunkingConfig::default()
        }
    }

    fn inventory_document() -> Document {
        Document::new(
            "srs",
            vec![
                "The inventory module tracks stock levels for every warehouse. \
                 Stock is decremented when an order ships."
                    .into(),
                "Customers browse the catalog and place orders. \
                 Each order has line items referencing products."
                    .into(),
                "Administrators manage users and assign roles. \
                 Reports summarise monthly sales by region."
                    .into(),
            ],
        )
    }

    #[tokio::test]
    async fn search_on_empty_store_fails() {
        let store = test_store(&small_chunks()).await;
        let err = store.search("anything", 3).await.unwrap_err();
        assert!(matches!(err, SpecWeaverError::EmptyIndex));
    }

    #[tokio::test]
    async fn index_rejects_blank_document() {
        let mut store = test_store(&small_chunks()).await;
        let err = store
            .index(&Document::new("blank", vec!["   ".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, SpecWeaverError::EmptyDocument { .. }));
    }

    #[tokio::test]
    async fn search_is_bounded_and_ordered() {
        let mut store = test_store(&small_chunks()).await;
        let summary = store.index(&inventory_document()).await.unwrap();
        assert!(summary.chunks_added >= 3);

        for k in [0, 1, 2, 50] {
            let result = store.search("stock levels in the warehouse", k).await.unwrap();
            assert!(result.len() <= k);
            assert!(
                result.hits.windows(2).all(|w| w[0].distance <= w[1].distance),
                "distances must be non-decreasing"
            );
        }

        let top = store.search("stock levels in the warehouse", 1).await.unwrap();
        assert!(top.hits[0].text.contains("inventory"));
    }

    #[tokio::test]
    async fn replace_mode_reindex_is_idempotent() {
        let mut store = test_store(&small_chunks()).await;
        let first = store.index(&inventory_document()).await.unwrap();
        let before = store.search("orders and products", 3).await.unwrap();

        let second = store.index(&inventory_document()).await.unwrap();
        let after = store.search("orders and products", 3).await.unwrap();

        assert_eq!(first.total_chunks, second.total_chunks);
        assert_eq!(second.chunks_replaced, first.chunks_added);
        assert_eq!(before.texts().collect::<Vec<_>>(), after.texts().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn reindex_after_clear_matches() {
        let mut store = test_store(&small_chunks()).await;
        let first = store.index(&inventory_document()).await.unwrap();
        let before = store.search("user roles", 2).await.unwrap();

        store.clear().await.unwrap();
        let second = store.index(&inventory_document()).await.unwrap();
        let after = store.search("user roles", 2).await.unwrap();

        assert_eq!(first.chunks_added, second.chunks_added);
        assert_eq!(before.texts().collect::<Vec<_>>(), after.texts().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn append_mode_keeps_duplicates_but_dedupes_results() {
        let mut store = test_store(&small_chunks()).await;
        store.set_mode(IndexMode::Append);
        assert_eq!(store.mode(), IndexMode::Append);
        let first = store.index(&inventory_document()).await.unwrap();
        let second = store.index(&inventory_document()).await.unwrap();

        let documents = store.documents().await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].name, "srs");
        assert_eq!(documents[0].page_count, 3);

        assert_eq!(second.total_chunks, first.chunks_added * 2);
        let result = store.search("customers place orders", 10).await.unwrap();
        let texts: Vec<&str> = result.texts().collect();
        let unique: HashSet<&str> = texts.iter().copied().collect();
        assert_eq!(texts.len(), unique.len());
    }

    #[tokio::test]
    async fn ids_keep_increasing_across_reopen() {
        let tmp = std::env::temp_dir().join(format!("sw_store_{}.db", Uuid::now_v7()));
        let config = small_chunks();
        let added = {
            let storage = Storage::open(&tmp).await.unwrap();
            let mut store = ChunkStore::open(storage, HashingEmbedder::new(64), &config)
                .await
                .unwrap();
            assert_eq!(store.next_id(), 1);
            store.index(&inventory_document()).await.unwrap().chunks_added
        };

        let storage = Storage::open(&tmp).await.unwrap();
        let store = ChunkStore::open(storage, HashingEmbedder::new(64), &config)
            .await
            .unwrap();
        assert_eq!(store.next_id(), added as i64 + 1);
    }

    #[tokio::test]
    async fn retriever_trait_delegates_to_search() {
        let mut store = test_store(&small_chunks()).await;
        store.index(&inventory_document()).await.unwrap();
        let via_trait = store.retrieve("monthly sales reports", 2).await.unwrap();
        let direct = store.search("monthly sales reports", 2).await.unwrap();
        assert_eq!(via_trait, direct);
    }
}
