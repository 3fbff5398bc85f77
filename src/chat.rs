//! Chat turn orchestration.
//!
//! One call to [`ChatEngine::ask`] runs a full turn:
//!
//! ```text
//! resolve conversation ─▶ load history ─▶ rewrite ─▶ retrieve ─▶ generate ─▶ append(user, assistant)
//! ```
//!
//! A rewrite failure falls back to the original question. A retrieval or
//! generation failure aborts the turn before anything is written, so the
//! log never holds a question without its answer.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::answer::AnswerGenerator;
use crate::error::{Error, Result};
use crate::models::{ChatTurn, NewMessage, Sentiment};
use crate::rewrite::{QueryRewriter, Rewrite};
use crate::search::Retriever;
use crate::store::ConversationStore;

/// Input of one chat turn.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Label recorded on the user message, if the caller has one.
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    pub fn in_conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

pub struct ChatEngine {
    conversations: Arc<dyn ConversationStore>,
    rewriter: QueryRewriter,
    retriever: Retriever,
    generator: AnswerGenerator,
    default_top_k: usize,
}

impl ChatEngine {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        rewriter: QueryRewriter,
        retriever: Retriever,
        generator: AnswerGenerator,
        default_top_k: usize,
    ) -> Self {
        Self {
            conversations,
            rewriter,
            retriever,
            generator,
            default_top_k,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Run one turn.
    ///
    /// A supplied conversation id that does not exist yet starts a new
    /// conversation under that id.
    ///
    /// # Errors
    ///
    /// - `Validation` for a blank question or `top_k == 0`
    /// - `Embedding`/`Storage` from retrieval, `Generation` from the answer
    ///   step; nothing is persisted in these cases
    /// - `Storage` if the turn cannot be recorded
    pub async fn ask(&self, request: AskRequest) -> Result<ChatTurn> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(Error::Validation("question must not be empty".to_string()));
        }
        let top_k = request.top_k.unwrap_or(self.default_top_k);
        if top_k == 0 {
            return Err(Error::Validation("top_k must be >= 1".to_string()));
        }

        let conversation_id = match request
            .conversation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            Some(id) => id.to_string(),
            None => self.conversations.create().await?,
        };

        let history = self
            .conversations
            .get(&conversation_id)
            .await?
            .map(|c| c.messages)
            .unwrap_or_default();

        let rewrite = match self.rewriter.rewrite(question, &history).await {
            Ok(rewrite) => rewrite,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "rewrite failed, using original question");
                Rewrite::unchanged(question)
            }
        };

        let hits = self.retriever.retrieve(&rewrite.text, top_k).await?;
        let context: Vec<String> = hits.iter().map(|h| h.text.clone()).collect();
        let answer = self
            .generator
            .generate(&rewrite.text, &context, &history)
            .await?;

        let annotation = rewrite.was_rewritten.then(|| rewrite.text.clone());
        self.conversations
            .append_all(
                &conversation_id,
                vec![
                    NewMessage::user(question)
                        .with_rewrite(annotation.clone())
                        .with_sentiment(request.sentiment),
                    NewMessage::assistant(answer.clone()),
                ],
            )
            .await?;

        info!(
            conversation_id = %conversation_id,
            rewritten = rewrite.was_rewritten,
            chunks = hits.len(),
            "answered question"
        );

        Ok(ChatTurn {
            conversation_id,
            question: question.to_string(),
            rewrite: annotation,
            answer,
            chunks_used: hits.len(),
        })
    }
}
