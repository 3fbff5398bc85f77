//! SQLite-backed storage.
//!
//! One [`SqliteStore`] wraps a [`SqlitePool`] and implements all three
//! storage traits against the schema created by [`crate::migrate`].
//! Timestamps are stored as Unix milliseconds. Vectors are stored as
//! little-endian `f32` BLOBs and scored with cosine similarity in Rust.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{rank, ConversationStore, DocumentStore, IndexHealth, Metric, VectorIndex};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::{
    Conversation, ConversationSummary, Document, DocumentStatus, Message, NewMessage,
    RetrievedChunk, Role, Sentiment, VectorPoint, DEFAULT_TITLE,
};

pub struct SqliteStore {
    pool: SqlitePool,
    max_messages: usize,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, max_messages: usize) -> Self {
        Self { pool, max_messages }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    let extracted_at: Option<i64> = row.get("extracted_at");
    Ok(Document {
        id: row.get("id"),
        filename: row.get("filename"),
        content_hash: row.get("content_hash"),
        size_bytes: row.get("size_bytes"),
        content_type: row.get("content_type"),
        status: DocumentStatus::parse(&status)?,
        extracted_text: row.get("extracted_text"),
        created_at: from_millis(row.get("created_at")),
        extracted_at: extracted_at.map(from_millis),
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let role: String = row.get("role");
    let sentiment: Option<String> = row.get("sentiment");
    Ok(Message {
        role: Role::parse(&role)?,
        content: row.get("content"),
        created_at: from_millis(row.get("created_at")),
        rewrite: row.get("rewrite"),
        sentiment: sentiment.as_deref().and_then(Sentiment::parse),
    })
}

const DOCUMENT_COLUMNS: &str = "id, filename, content_hash, size_bytes, content_type, status, \
                                extracted_text, created_at, extracted_at";

// ============ Documents ============

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert(&self, doc: &Document) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (id, filename, content_hash, size_bytes, content_type,
                                   status, extracted_text, created_at, extracted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.filename)
        .bind(&doc.content_hash)
        .bind(doc.size_bytes)
        .bind(&doc.content_type)
        .bind(doc.status.as_str())
        .bind(&doc.extracted_text)
        .bind(doc.created_at.timestamp_millis())
        .bind(doc.extracted_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::DuplicateResource(format!(
                    "a document with hash {} already exists",
                    doc.content_hash
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE content_hash = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents ORDER BY created_at DESC, id ASC",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn mark_extracted(&self, id: &str, text: &str, at: DateTime<Utc>) -> Result<Document> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'EXTRACTED', extracted_text = ?, extracted_at = ?
            WHERE id = ? AND status = 'UPLOADED'
            "#,
        )
        .bind(text)
        .bind(at.timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        DocumentStore::get(self, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("document {}", id)));
        }
        Ok(())
    }
}

// ============ Conversations ============

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create(&self) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO conversations (id, title, created_at, updated_at, seq)
            VALUES (?, ?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM conversations))
            "#,
        )
        .bind(&id)
        .bind(DEFAULT_TITLE)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let Some(row) =
            sqlx::query("SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let message_rows = sqlx::query(
            r#"
            SELECT role, content, rewrite, sentiment, created_at
            FROM messages
            WHERE conversation_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Conversation {
            id: row.get("id"),
            title: row.get("title"),
            created_at: from_millis(row.get("created_at")),
            updated_at: from_millis(row.get("updated_at")),
            messages: message_rows
                .iter()
                .map(message_from_row)
                .collect::<Result<Vec<_>>>()?,
        }))
    }

    async fn append_all(&self, id: &str, messages: Vec<NewMessage>) -> Result<()> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();

        // The first statement writes, so the transaction holds the write
        // lock from the start and the trim is never observed half-done.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, title, created_at, updated_at, seq)
            VALUES (?, ?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM conversations))
            ON CONFLICT(id) DO UPDATE SET
                updated_at = MAX(conversations.updated_at, excluded.updated_at),
                seq = excluded.seq
            "#,
        )
        .bind(id)
        .bind(DEFAULT_TITLE)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&mut *tx)
        .await?;

        for message in messages {
            let message = message.into_message(now);
            sqlx::query(
                r#"
                INSERT INTO messages (conversation_id, role, content, rewrite, sentiment, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(&message.rewrite)
            .bind(message.sentiment.map(|s| s.as_str()))
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            DELETE FROM messages
            WHERE conversation_id = ?
              AND id NOT IN (
                  SELECT id FROM messages
                  WHERE conversation_id = ?
                  ORDER BY id DESC
                  LIMIT ?
              )
            "#,
        )
        .bind(id)
        .bind(id)
        .bind(self.max_messages as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn latest(&self) -> Result<Option<Conversation>> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM conversations ORDER BY updated_at DESC, seq DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        match id {
            Some(id) => ConversationStore::get(self, &id).await,
            None => Ok(None),
        }
    }

    async fn list(&self, limit: usize) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, updated_at FROM conversations
            ORDER BY updated_at DESC, seq DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ConversationSummary {
                conversation_id: row.get("id"),
                title: row.get("title"),
                updated_at: from_millis(row.get("updated_at")),
            })
            .collect())
    }

    async fn rename(&self, id: &str, title: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET title = ?,
                updated_at = MAX(updated_at, ?),
                seq = (SELECT COALESCE(MAX(seq), 0) + 1 FROM conversations)
            WHERE id = ?
            "#,
        )
        .bind(title)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("conversation {}", id)));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("conversation {}", id)));
        }
        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

// ============ Vectors ============

#[async_trait]
impl VectorIndex for SqliteStore {
    async fn ensure_collection(&self, name: &str, dims: usize, metric: Metric) -> Result<()> {
        sqlx::query(
            "INSERT INTO collections (name, dims, metric) VALUES (?, ?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(dims as i64)
        .bind(metric.as_str())
        .execute(&self.pool)
        .await?;

        let existing: i64 = sqlx::query_scalar("SELECT dims FROM collections WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        if existing as usize != dims {
            return Err(Error::Validation(format!(
                "collection {} has {} dims, requested {}",
                name, existing, dims
            )));
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: &[VectorPoint]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM collections WHERE name = ?")
            .bind(collection)
            .fetch_optional(&mut *tx)
            .await?;
        let dims = dims
            .ok_or_else(|| Error::Storage(format!("collection {} does not exist", collection)))?
            as usize;

        for point in points {
            if point.vector.len() != dims {
                return Err(Error::Validation(format!(
                    "point {} has {} dims, collection {} expects {}",
                    point.id,
                    point.vector.len(),
                    collection,
                    dims
                )));
            }
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (collection, point_id, document_id, chunk_index, text, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, point_id) DO UPDATE SET
                    document_id = excluded.document_id,
                    chunk_index = excluded.chunk_index,
                    text = excluded.text,
                    embedding = excluded.embedding
                "#,
            )
            .bind(collection)
            .bind(&point.id)
            .bind(&point.document_id)
            .bind(point.chunk_index)
            .bind(&point.text)
            .bind(vec_to_blob(&point.vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query(
            "SELECT document_id, chunk_index, text, embedding FROM chunk_vectors WHERE collection = ?",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let scored = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                RetrievedChunk {
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                    document_id: row.get("document_id"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                }
            })
            .collect();
        Ok(rank(scored, top_k))
    }

    async fn delete_document(&self, collection: &str, document_id: &str) -> Result<usize> {
        let result =
            sqlx::query("DELETE FROM chunk_vectors WHERE collection = ? AND document_id = ?")
                .bind(collection)
                .bind(document_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn health(&self) -> Result<IndexHealth> {
        let collections: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collections")
            .fetch_one(&self.pool)
            .await?;
        let points: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(IndexHealth {
            backend: "sqlite",
            collections: collections as usize,
            points: points as usize,
        })
    }
}
