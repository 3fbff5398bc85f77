//! Core data models used throughout docchat.
//!
//! These types represent the conversations, documents, chunks, and retrieval
//! results that flow through the upload, indexing, and chat pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Title given to conversations until the user renames them.
pub const DEFAULT_TITLE: &str = "New chat";

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(Error::Storage(format!("unknown message role: {}", other))),
        }
    }
}

/// Sentiment label attached to user messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }

    /// Parses a label case-insensitively, ignoring surrounding punctuation.
    pub fn parse(value: &str) -> Option<Self> {
        let cleaned = value
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_ascii_lowercase();
        match cleaned.as_str() {
            "positive" => Some(Sentiment::Positive),
            "neutral" => Some(Sentiment::Neutral),
            "negative" => Some(Sentiment::Negative),
            _ => None,
        }
    }

    /// Emoticon shown next to labeled questions in reports.
    pub fn marker(&self) -> &'static str {
        match self {
            Sentiment::Positive => ":)",
            Sentiment::Neutral => ":|",
            Sentiment::Negative => ":(",
        }
    }
}

/// A message stored in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
}

impl Message {
    /// Text used when this message feeds the rewriter: the stored
    /// rewrite when present, else the raw content.
    pub fn effective_text(&self) -> &str {
        self.rewrite.as_deref().unwrap_or(&self.content)
    }
}

/// A message about to be appended. The store assigns the timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub rewrite: Option<String>,
    pub sentiment: Option<Sentiment>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            rewrite: None,
            sentiment: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            rewrite: None,
            sentiment: None,
        }
    }

    pub fn with_rewrite(mut self, rewrite: Option<String>) -> Self {
        self.rewrite = rewrite;
        self
    }

    pub fn with_sentiment(mut self, sentiment: Option<Sentiment>) -> Self {
        self.sentiment = sentiment;
        self
    }

    /// Converts into a stored message. Sentiment and rewrite annotations
    /// only survive on user messages.
    pub fn into_message(self, created_at: DateTime<Utc>) -> Message {
        let is_user = self.role == Role::User;
        Message {
            role: self.role,
            content: self.content,
            created_at,
            rewrite: self.rewrite.filter(|_| is_user),
            sentiment: self.sentiment.filter(|_| is_user),
        }
    }
}

/// A conversation and its bounded message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: DEFAULT_TITLE.to_string(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }
}

/// Entry returned by conversation listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentStatus {
    Uploaded,
    Extracted,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "UPLOADED",
            DocumentStatus::Extracted => "EXTRACTED",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "UPLOADED" => Ok(DocumentStatus::Uploaded),
            "EXTRACTED" => Ok(DocumentStatus::Extracted),
            other => Err(Error::Storage(format!("unknown document status: {}", other))),
        }
    }
}

/// An uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
}

/// Document metadata without the extracted text, used in listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub filename: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&Document> for DocumentSummary {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            filename: doc.filename.clone(),
            size_bytes: doc.size_bytes,
            content_type: doc.content_type.clone(),
            status: doc.status,
            created_at: doc.created_at,
        }
    }
}

/// A window of a document's extracted text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// An embedded chunk as stored in the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
}

/// A chunk returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub score: f32,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
}

/// Result of one chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub conversation_id: String,
    pub question: String,
    pub rewrite: Option<String>,
    pub answer: String,
    pub chunks_used: usize,
}
