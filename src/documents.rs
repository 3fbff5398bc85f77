//! Document lifecycle: upload, extract, embed, list, delete.
//!
//! ```text
//! upload ──▶ UPLOADED ──extract──▶ EXTRACTED ──embed──▶ points in the vector index
//!                                                     ▲
//!                    delete removes points, file, and record
//! ```
//!
//! Upload validation order is fixed: file type first, then the content
//! hash, then the duplicate lookup. Nothing is hashed or stored for a file
//! that is not a PDF.

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{check_dims, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::extract::{extract_pdf_text, validate_pdf_upload, MIME_PDF};
use crate::files::FileStore;
use crate::models::{Document, DocumentStatus, VectorPoint};
use crate::store::{DocumentStore, Metric, VectorIndex};

/// Tunables for [`DocumentService`].
#[derive(Debug, Clone)]
pub struct DocumentSettings {
    pub collection: String,
    pub window_chars: usize,
    pub overlap_chars: usize,
    pub batch_size: usize,
    pub max_upload_bytes: usize,
}

impl DocumentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            collection: config.retrieval.collection.clone(),
            window_chars: config.chunking.window_chars,
            overlap_chars: config.chunking.overlap_chars,
            batch_size: config.embedding.batch_size.max(1),
            max_upload_bytes: config.storage.max_upload_bytes,
        }
    }
}

/// Outcome of [`DocumentService::embed`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedReport {
    pub document_id: String,
    pub collection: String,
    pub chunks: usize,
}

pub struct DocumentService {
    documents: Arc<dyn DocumentStore>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    files: FileStore,
    settings: DocumentSettings,
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl DocumentService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        files: FileStore,
        settings: DocumentSettings,
    ) -> Self {
        Self {
            documents,
            vectors,
            embedder,
            files,
            settings,
        }
    }

    pub fn settings(&self) -> &DocumentSettings {
        &self.settings
    }

    /// Store an uploaded PDF and record it as `UPLOADED`.
    ///
    /// # Errors
    ///
    /// - `UnsupportedMedia` for anything but a `.pdf` declared as `application/pdf`
    /// - `Validation` for an empty or oversized body
    /// - `DuplicateResource` when identical bytes were uploaded before
    pub async fn upload(
        &self,
        filename: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<Document> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(Error::Validation("file name must not be empty".to_string()));
        }
        validate_pdf_upload(filename, content_type)?;

        if bytes.is_empty() {
            return Err(Error::Validation("uploaded file is empty".to_string()));
        }
        if bytes.len() > self.settings.max_upload_bytes {
            return Err(Error::Validation(format!(
                "file is {} bytes, the limit is {}",
                bytes.len(),
                self.settings.max_upload_bytes
            )));
        }

        let hash = content_hash(&bytes);
        if let Some(existing) = self.documents.find_by_hash(&hash).await? {
            return Err(Error::DuplicateResource(format!(
                "{} has the same content as document {}",
                filename, existing.id
            )));
        }

        let doc = Document {
            id: Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            content_hash: hash,
            size_bytes: bytes.len() as i64,
            content_type: MIME_PDF.to_string(),
            status: DocumentStatus::Uploaded,
            extracted_text: None,
            created_at: Utc::now(),
            extracted_at: None,
        };

        self.files.save(&doc.id, &bytes).await?;
        if let Err(e) = self.documents.insert(&doc).await {
            // Lost a race with an identical upload, or the store failed.
            if let Err(cleanup) = self.files.remove(&doc.id).await {
                warn!(document_id = %doc.id, error = %cleanup, "failed to remove orphaned upload");
            }
            return Err(e);
        }

        info!(document_id = %doc.id, filename = %doc.filename, size = doc.size_bytes, "uploaded document");
        Ok(doc)
    }

    pub async fn get(&self, id: &str) -> Result<Document> {
        self.documents
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))
    }

    pub async fn list(&self) -> Result<Vec<Document>> {
        self.documents.list().await
    }

    /// Extract text once. An already extracted document is returned as is
    /// without touching the file.
    pub async fn extract(&self, id: &str) -> Result<Document> {
        let doc = self.get(id).await?;
        if doc.status == DocumentStatus::Extracted {
            return Ok(doc);
        }

        let bytes = self.files.read(id).await?;
        let text = extract_pdf_text(bytes).await?;
        let doc = self.documents.mark_extracted(id, &text, Utc::now()).await?;

        info!(document_id = %id, chars = text.chars().count(), "extracted text");
        Ok(doc)
    }

    /// Chunk the extracted text, embed every chunk, and upsert the points.
    ///
    /// Point ids are derived from `(document id, chunk index)`, so running
    /// this twice overwrites the earlier points.
    pub async fn embed(&self, id: &str) -> Result<EmbedReport> {
        let doc = self.get(id).await?;
        let text = doc
            .extracted_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::NotFound(format!("extracted text for document {}", id)))?;

        let chunks = chunk_text(
            &doc.id,
            text,
            self.settings.window_chars,
            self.settings.overlap_chars,
        )?;

        let mut points = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.settings.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "provider returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }
            for (chunk, vector) in batch.iter().zip(vectors) {
                check_dims(self.embedder.as_ref(), &vector)?;
                points.push(VectorPoint {
                    id: chunk.id.clone(),
                    vector,
                    document_id: chunk.document_id.clone(),
                    chunk_index: chunk.chunk_index,
                    text: chunk.text.clone(),
                });
            }
        }

        self.vectors
            .ensure_collection(
                &self.settings.collection,
                self.embedder.dims(),
                Metric::Cosine,
            )
            .await?;
        // Chunk settings may have changed since the last run.
        self.vectors
            .delete_document(&self.settings.collection, &doc.id)
            .await?;
        self.vectors
            .upsert(&self.settings.collection, &points)
            .await?;

        info!(
            document_id = %id,
            chunks = points.len(),
            model = self.embedder.model_name(),
            "embedded document"
        );
        Ok(EmbedReport {
            document_id: doc.id,
            collection: self.settings.collection.clone(),
            chunks: points.len(),
        })
    }

    /// Remove a document's vectors, stored file, and record, in that order.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let doc = self.get(id).await?;
        let removed = self
            .vectors
            .delete_document(&self.settings.collection, &doc.id)
            .await?;
        self.files.remove(&doc.id).await?;
        self.documents.delete(&doc.id).await?;
        info!(document_id = %id, points = removed, "deleted document");
        Ok(())
    }
}
