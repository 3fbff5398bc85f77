//! Storage abstractions.
//!
//! Three traits define everything the pipeline persists:
//!
//! | Trait | Holds |
//! |-------|-------|
//! | [`DocumentStore`] | uploaded document metadata and extracted text |
//! | [`ConversationStore`] | bounded, ordered message logs |
//! | [`VectorIndex`] | embedded chunks, queried by cosine similarity |
//!
//! Two backends implement all three: [`SqliteStore`] for deployments and
//! [`InMemoryStore`] for tests and ephemeral runs. Implementations must be
//! `Send + Sync` to be shared across request handlers.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{
    Conversation, ConversationSummary, Document, NewMessage, RetrievedChunk, VectorPoint,
};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Document metadata persistence.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document. Fails with
    /// [`Error::DuplicateResource`](crate::error::Error::DuplicateResource)
    /// when another document has the same content hash.
    async fn insert(&self, doc: &Document) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Document>>;

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<Document>>;

    /// All documents, newest first.
    async fn list(&self) -> Result<Vec<Document>>;

    /// Atomically move an `UPLOADED` document to `EXTRACTED`.
    ///
    /// A document that is already extracted is returned unchanged.
    /// Unknown ids fail with `NotFound`.
    async fn mark_extracted(&self, id: &str, text: &str, at: DateTime<Utc>) -> Result<Document>;

    /// Unknown ids fail with `NotFound`.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Capacity-bounded conversation log.
///
/// Every mutation bumps `updated_at` (never backwards) and moves the
/// conversation to the front of [`list`](ConversationStore::list).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Allocate an empty conversation with the default title.
    async fn create(&self) -> Result<String>;

    async fn get(&self, id: &str) -> Result<Option<Conversation>>;

    /// Append one message, creating the conversation if absent, then trim
    /// to the configured cap by dropping the oldest messages. Atomic: no
    /// reader ever observes more than the cap.
    async fn append(&self, id: &str, message: NewMessage) -> Result<()> {
        self.append_all(id, vec![message]).await
    }

    /// Append several messages in order as one atomic update. A chat turn
    /// records its question and answer this way.
    async fn append_all(&self, id: &str, messages: Vec<NewMessage>) -> Result<()>;

    /// The most recently touched conversation.
    async fn latest(&self) -> Result<Option<Conversation>>;

    async fn list(&self, limit: usize) -> Result<Vec<ConversationSummary>>;

    async fn rename(&self, id: &str, title: &str) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// Similarity metric of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
        }
    }
}

/// Reported by [`VectorIndex::health`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexHealth {
    pub backend: &'static str,
    pub collections: usize,
    pub points: usize,
}

/// Named collections of embedded chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if missing. Idempotent; fails with
    /// `Validation` if it exists with a different dimension.
    async fn ensure_collection(&self, name: &str, dims: usize, metric: Metric) -> Result<()>;

    /// Insert or overwrite points by id.
    async fn upsert(&self, collection: &str, points: &[VectorPoint]) -> Result<()>;

    /// Top `top_k` points by descending similarity. A missing or empty
    /// collection yields an empty result.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>>;

    /// Remove every point derived from a document. Returns the count.
    async fn delete_document(&self, collection: &str, document_id: &str) -> Result<usize>;

    async fn health(&self) -> Result<IndexHealth>;
}

/// Orders scored chunks by score descending, then by document and index so
/// that ties are deterministic.
pub(crate) fn rank(mut scored: Vec<RetrievedChunk>, top_k: usize) -> Vec<RetrievedChunk> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
    scored.truncate(top_k);
    scored
}

/// Keeps the most recent `cap` messages.
pub(crate) fn trim_oldest<T>(messages: &mut Vec<T>, cap: usize) {
    if messages.len() > cap {
        let excess = messages.len() - cap;
        messages.drain(..excess);
    }
}
