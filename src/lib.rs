//! # docchat
//!
//! A retrieval-augmented chat backend for PDF documents.
//!
//! Users upload PDFs, which are stored, extracted to text, split into
//! overlapping windows and embedded into a vector index. Questions are
//! rewritten against the conversation history into self-contained search
//! queries, the nearest chunks are retrieved, and a language model answers
//! from those chunks only. Each conversation keeps a bounded message log.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────┐   ┌───────────┐
//! │  upload  │──▶│ extract  │──▶│  chunk  │──▶│   embed    │
//! └──────────┘   └──────────┘   └─────────┘   └─────┬─────┘
//!                                                    ▼
//!  question ──▶ rewrite ──▶ retrieve ◀──────── vector index
//!                              │
//!                              ▼
//!                          generate ──▶ conversation store
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error type shared by the pipelines |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Document, conversation and vector storage |
//! | [`files`] | Uploaded file bytes on disk |
//! | [`extract`] | PDF validation and text extraction |
//! | [`chunk`] | Overlapping character windows |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat-completion model abstraction |
//! | [`retry`] | Backoff for outbound HTTP calls |
//! | [`documents`] | Upload, extract, embed and delete documents |
//! | [`search`] | Similarity retrieval |
//! | [`rewrite`] | History-aware query rewriting |
//! | [`answer`] | Grounded answer generation |
//! | [`chat`] | One chat turn, end to end |
//! | [`sentiment`] | Sentiment labels for user messages |
//! | [`report`] | PDF conversation reports |
//! | [`app`] | Wiring from config |
//! | [`server`] | HTTP API |

pub mod answer;
pub mod app;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod files;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod report;
pub mod retry;
pub mod rewrite;
pub mod search;
pub mod sentiment;
pub mod server;
pub mod store;
