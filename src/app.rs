//! Application wiring.
//!
//! [`AppContext`] owns one instance of every collaborator and hands them to
//! the HTTP server and the CLI. Nothing is a global: tests build a context
//! with [`AppContext::with_store`] and fake providers.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::answer::AnswerGenerator;
use crate::chat::ChatEngine;
use crate::config::Config;
use crate::db;
use crate::documents::{DocumentService, DocumentSettings};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::files::FileStore;
use crate::llm::{create_chat_model, ChatModel};
use crate::migrate;
use crate::rewrite::QueryRewriter;
use crate::search::Retriever;
use crate::sentiment::{create_classifier, SentimentClassifier};
use crate::store::{ConversationStore, DocumentStore, InMemoryStore, SqliteStore, VectorIndex};

pub struct AppContext {
    pub config: Config,
    pub documents: DocumentService,
    pub chat: ChatEngine,
    pub conversations: Arc<dyn ConversationStore>,
    pub index: Arc<dyn VectorIndex>,
    pub sentiment: Arc<dyn SentimentClassifier>,
}

impl AppContext {
    /// Open the database, apply migrations and build providers from config.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool, config.conversation.max_messages));

        let embedder = create_provider(&config.embedding)
            .context("Failed to create embedding provider")?;
        let model = create_chat_model(&config.llm).context("Failed to create chat model")?;

        info!(
            db = %config.db.path.display(),
            embedding = embedder.model_name(),
            llm = model.model_name(),
            "application context ready"
        );
        Self::with_store(config.clone(), store, embedder, model)
    }

    /// Everything in memory. Nothing survives the process.
    pub fn in_memory(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        let store = Arc::new(InMemoryStore::new(config.conversation.max_messages));
        Self::with_store(config, store, embedder, model)
    }

    /// Wire every component around one backend that implements all three
    /// storage traits.
    pub fn with_store<S>(
        config: Config,
        store: Arc<S>,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn ChatModel>,
    ) -> Result<Self>
    where
        S: DocumentStore + ConversationStore + VectorIndex + 'static,
    {
        let documents: Arc<dyn DocumentStore> = store.clone();
        let conversations: Arc<dyn ConversationStore> = store.clone();
        let index: Arc<dyn VectorIndex> = store;

        let sentiment = create_classifier(&config.sentiment, model.clone())?;

        let document_service = DocumentService::new(
            documents,
            index.clone(),
            embedder.clone(),
            FileStore::new(config.storage.dir.clone()),
            DocumentSettings::from_config(&config),
        );

        let chat = ChatEngine::new(
            conversations.clone(),
            QueryRewriter::new(
                model.clone(),
                config.conversation.rewrite_window,
                config.llm.rewrite_temperature,
            ),
            Retriever::new(embedder, index.clone(), config.retrieval.collection.clone()),
            AnswerGenerator::new(
                model,
                config.conversation.history_window,
                config.llm.answer_temperature,
            ),
            config.retrieval.top_k,
        );

        Ok(Self {
            config,
            documents: document_service,
            chat,
            conversations,
            index,
            sentiment,
        })
    }
}
