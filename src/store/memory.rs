//! In-memory storage backend.
//!
//! Implements every storage trait with `std::sync` locks. Conversations sit
//! behind one `RwLock`ed map of per-conversation `Mutex`es: appends to
//! different conversations only share the read lock, while create and
//! delete take the write lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{
    rank, trim_oldest, ConversationStore, DocumentStore, IndexHealth, Metric, VectorIndex,
};
use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{
    Conversation, ConversationSummary, Document, DocumentStatus, NewMessage, RetrievedChunk,
    VectorPoint,
};

struct ConversationEntry {
    conversation: Conversation,
    /// Touch order across the store, breaks `updated_at` ties.
    seq: u64,
}

struct Collection {
    dims: usize,
    #[allow(dead_code)]
    metric: Metric,
    points: HashMap<String, VectorPoint>,
}

pub struct InMemoryStore {
    max_messages: usize,
    seq: AtomicU64,
    docs: RwLock<HashMap<String, Document>>,
    conversations: RwLock<HashMap<String, Mutex<ConversationEntry>>>,
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages,
            seq: AtomicU64::new(0),
            docs: RwLock::new(HashMap::new()),
            conversations: RwLock::new(HashMap::new()),
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn touch(&self, entry: &mut ConversationEntry, now: DateTime<Utc>) {
        entry.conversation.updated_at = entry.conversation.updated_at.max(now);
        entry.seq = self.next_seq();
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Storage("in-memory store lock poisoned".to_string())
}

// ============ Documents ============

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert(&self, doc: &Document) -> Result<()> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        if docs.values().any(|d| d.content_hash == doc.content_hash) {
            return Err(Error::DuplicateResource(format!(
                "a document with hash {} already exists",
                doc.content_hash
            )));
        }
        if docs.contains_key(&doc.id) {
            return Err(Error::DuplicateResource(format!("document {}", doc.id)));
        }
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.get(id).cloned())
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs
            .values()
            .find(|d| d.content_hash == content_hash)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        let mut all: Vec<Document> = docs.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn mark_extracted(&self, id: &str, text: &str, at: DateTime<Utc>) -> Result<Document> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;
        if doc.status == DocumentStatus::Uploaded {
            doc.status = DocumentStatus::Extracted;
            doc.extracted_text = Some(text.to_string());
            doc.extracted_at = Some(at);
        }
        Ok(doc.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        docs.remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))
    }
}

// ============ Conversations ============

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create(&self) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let entry = ConversationEntry {
            conversation: Conversation::new(id.clone(), Utc::now()),
            seq: self.next_seq(),
        };
        let mut map = self.conversations.write().map_err(poisoned)?;
        map.insert(id.clone(), Mutex::new(entry));
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let map = self.conversations.read().map_err(poisoned)?;
        match map.get(id) {
            Some(entry) => Ok(Some(entry.lock().map_err(poisoned)?.conversation.clone())),
            None => Ok(None),
        }
    }

    async fn append_all(&self, id: &str, messages: Vec<NewMessage>) -> Result<()> {
        let mut pending = Some(messages);
        loop {
            {
                let map = self.conversations.read().map_err(poisoned)?;
                if let Some(entry) = map.get(id) {
                    let mut entry = entry.lock().map_err(poisoned)?;
                    let now = Utc::now();
                    for message in pending.take().unwrap_or_default() {
                        entry.conversation.messages.push(message.into_message(now));
                    }
                    trim_oldest(&mut entry.conversation.messages, self.max_messages);
                    self.touch(&mut entry, now);
                    return Ok(());
                }
            }

            // Upsert, then retry under the read lock.
            let mut map = self.conversations.write().map_err(poisoned)?;
            map.entry(id.to_string()).or_insert_with(|| {
                Mutex::new(ConversationEntry {
                    conversation: Conversation::new(id, Utc::now()),
                    seq: 0,
                })
            });
        }
    }

    async fn latest(&self) -> Result<Option<Conversation>> {
        let map = self.conversations.read().map_err(poisoned)?;
        let mut best: Option<(DateTime<Utc>, u64, Conversation)> = None;
        for entry in map.values() {
            let entry = entry.lock().map_err(poisoned)?;
            let key = (entry.conversation.updated_at, entry.seq);
            if best.as_ref().map_or(true, |(u, s, _)| key > (*u, *s)) {
                best = Some((key.0, key.1, entry.conversation.clone()));
            }
        }
        Ok(best.map(|(_, _, c)| c))
    }

    async fn list(&self, limit: usize) -> Result<Vec<ConversationSummary>> {
        let map = self.conversations.read().map_err(poisoned)?;
        let mut rows = Vec::with_capacity(map.len());
        for entry in map.values() {
            let entry = entry.lock().map_err(poisoned)?;
            rows.push((
                entry.seq,
                ConversationSummary {
                    conversation_id: entry.conversation.id.clone(),
                    title: entry.conversation.title.clone(),
                    updated_at: entry.conversation.updated_at,
                },
            ));
        }
        rows.sort_by(|(sa, a), (sb, b)| b.updated_at.cmp(&a.updated_at).then(sb.cmp(sa)));
        Ok(rows.into_iter().take(limit).map(|(_, s)| s).collect())
    }

    async fn rename(&self, id: &str, title: &str) -> Result<()> {
        let map = self.conversations.read().map_err(poisoned)?;
        let entry = map
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("conversation {}", id)))?;
        let mut entry = entry.lock().map_err(poisoned)?;
        entry.conversation.title = title.to_string();
        self.touch(&mut entry, Utc::now());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut map = self.conversations.write().map_err(poisoned)?;
        map.remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("conversation {}", id)))
    }
}

// ============ Vectors ============

#[async_trait]
impl VectorIndex for InMemoryStore {
    async fn ensure_collection(&self, name: &str, dims: usize, metric: Metric) -> Result<()> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        match collections.get(name) {
            Some(existing) if existing.dims != dims => Err(Error::Validation(format!(
                "collection {} has {} dims, requested {}",
                name, existing.dims, dims
            ))),
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    name.to_string(),
                    Collection {
                        dims,
                        metric,
                        points: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn upsert(&self, collection: &str, points: &[VectorPoint]) -> Result<()> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| Error::Storage(format!("collection {} does not exist", collection)))?;
        if let Some(bad) = points.iter().find(|p| p.vector.len() != target.dims) {
            return Err(Error::Validation(format!(
                "point {} has {} dims, collection {} expects {}",
                bad.id,
                bad.vector.len(),
                collection,
                target.dims
            )));
        }
        for point in points {
            target.points.insert(point.id.clone(), point.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let collections = self.collections.read().map_err(poisoned)?;
        let Some(target) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let scored = target
            .points
            .values()
            .map(|p| RetrievedChunk {
                score: cosine_similarity(vector, &p.vector),
                document_id: p.document_id.clone(),
                chunk_index: p.chunk_index,
                text: p.text.clone(),
            })
            .collect();
        Ok(rank(scored, top_k))
    }

    async fn delete_document(&self, collection: &str, document_id: &str) -> Result<usize> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = target.points.len();
        target.points.retain(|_, p| p.document_id != document_id);
        Ok(before - target.points.len())
    }

    async fn health(&self) -> Result<IndexHealth> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(IndexHealth {
            backend: "memory",
            collections: collections.len(),
            points: collections.values().map(|c| c.points.len()).sum(),
        })
    }
}
