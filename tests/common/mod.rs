//! Fakes and fixtures shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use docchat::app::AppContext;
use docchat::config::Config;
use docchat::embedding::EmbeddingProvider;
use docchat::error::{Error, Result};
use docchat::llm::{ChatMessage, ChatModel};
use docchat::rewrite::REWRITE_SYSTEM_PROMPT;

pub const HASH_DIMS: usize = 64;

/// Deterministic bag-of-words embedder: each lowercase word bumps one
/// bucket, and the vector is L2-normalized.
pub struct HashEmbedder;

pub fn hash_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; HASH_DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in word.to_lowercase().bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        v[(h % HASH_DIMS as u64) as usize] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-test"
    }

    fn dims(&self) -> usize {
        HASH_DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn dims(&self) -> usize {
        HASH_DIMS
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::Embedding("embedding service unavailable".to_string()))
    }
}

type Responder = Box<dyn Fn(&[ChatMessage]) -> Result<String> + Send + Sync>;

/// Chat model driven by a closure. Records every request it receives.
pub struct ScriptedModel {
    responder: Responder,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(
        responder: impl Fn(&[ChatMessage]) -> Result<String> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Always replies with `text`.
    pub fn constant(text: &str) -> Arc<Self> {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[ChatMessage], _temperature: f32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages.to_vec());
        (self.responder)(messages)
    }
}

/// True when the request is a rewrite prompt rather than an answer prompt.
pub fn is_rewrite_call(messages: &[ChatMessage]) -> bool {
    messages
        .first()
        .is_some_and(|m| m.content == REWRITE_SYSTEM_PROMPT)
}

/// The final user message of a request.
pub fn last_user_content(messages: &[ChatMessage]) -> String {
    messages
        .last()
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

/// Default config rooted in `tmp`.
pub fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("data").join("docchat.sqlite");
    config.storage.dir = tmp.path().join("files");
    config
}

pub fn memory_context(
    tmp: &TempDir,
    embedder: Arc<dyn EmbeddingProvider>,
    model: Arc<dyn ChatModel>,
) -> AppContext {
    AppContext::in_memory(test_config(tmp), embedder, model).unwrap()
}

/// A one-page PDF whose only text is `phrase` in Helvetica.
pub fn minimal_pdf_with_text(phrase: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            stream.len(),
            stream
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

pub const REFUND_POLICY: &str = "Refund policy. Customers may return most items within 30 days of \
delivery for a full refund. Electronics can be returned within 15 days if unopened. Gift cards \
are not refundable.";
