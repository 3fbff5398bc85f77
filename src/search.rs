//! Similarity retrieval.
//!
//! [`Retriever`] embeds a query with the same provider used at indexing time
//! and asks the vector index for the nearest chunks.

use std::sync::Arc;
use tracing::debug;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::RetrievedChunk;
use crate::store::VectorIndex;

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    collection: String,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            collection: collection.into(),
        }
    }

    /// Up to `top_k` chunks ordered by descending cosine similarity.
    ///
    /// An empty index is not an error: it yields an empty result.
    ///
    /// # Errors
    ///
    /// - `Validation` for a blank query or `top_k == 0`
    /// - `Embedding` if the query cannot be embedded
    /// - `Storage` if the index cannot be queried
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
        if query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".to_string()));
        }
        if top_k == 0 {
            return Err(Error::Validation("top_k must be >= 1".to_string()));
        }

        let vector = embed_query(self.embedder.as_ref(), query).await?;
        let mut hits = self.index.query(&self.collection, &vector, top_k).await?;
        hits.truncate(top_k);

        debug!(
            hits = hits.len(),
            top_score = hits.first().map(|h| h.score),
            "retrieved chunks"
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::models::VectorPoint;
    use crate::store::{InMemoryStore, Metric};

    /// Maps a text to a fixed 2-d direction by its first letter.
    struct Compass;

    #[async_trait]
    impl EmbeddingProvider for Compass {
        fn model_name(&self) -> &str {
            "compass"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.starts_with('n') {
                        vec![0.0, 1.0]
                    } else {
                        vec![1.0, 0.0]
                    }
                })
                .collect())
        }
    }

    fn point(id: &str, vector: Vec<f32>, index: i64) -> VectorPoint {
        VectorPoint {
            id: id.to_string(),
            vector,
            document_id: "doc".to_string(),
            chunk_index: index,
            text: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_retrieve_orders_by_similarity() {
        let store = Arc::new(InMemoryStore::new(10));
        store.ensure_collection("c", 2, Metric::Cosine).await.unwrap();
        store
            .upsert(
                "c",
                &[
                    point("east", vec![1.0, 0.0], 0),
                    point("north", vec![0.0, 1.0], 1),
                    point("northeast", vec![1.0, 1.0], 2),
                ],
            )
            .await
            .unwrap();

        let retriever = Retriever::new(Arc::new(Compass), store, "c");
        let hits = retriever.retrieve("north please", 2).await.unwrap();
        let texts: Vec<_> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["north", "northeast"]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_empty_collection_yields_nothing() {
        let retriever = Retriever::new(Arc::new(Compass), Arc::new(InMemoryStore::new(10)), "c");
        assert!(retriever.retrieve("anything", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_blank_query_and_zero_top_k() {
        let retriever = Retriever::new(Arc::new(Compass), Arc::new(InMemoryStore::new(10)), "c");
        assert!(matches!(
            retriever.retrieve("  ", 5).await.unwrap_err(),
            Error::Validation(_)
        ));
        assert!(matches!(
            retriever.retrieve("q", 0).await.unwrap_err(),
            Error::Validation(_)
        ));
    }
}
