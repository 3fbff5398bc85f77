//! Sentiment labels for user messages.
//!
//! Labels are a post-processing concern: the chat turn stores whatever label
//! the caller supplied, and reports classify the remaining user messages
//! through a [`SentimentClassifier`].
//!
//! | Provider | Classifier |
//! |----------|------------|
//! | `lexicon` | [`LexiconClassifier`], offline word lists |
//! | `llm` | [`ModelClassifier`], one-word answer from the chat model |
//! | `disabled` | [`DisabledClassifier`], always fails |

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::config::SentimentConfig;
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, ChatModel};
use crate::models::{Conversation, Role, Sentiment};

#[async_trait]
pub trait SentimentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Sentiment>;
}

const POSITIVE_WORDS: &[&str] = &[
    "good",
    "great",
    "excellent",
    "amazing",
    "awesome",
    "love",
    "like",
    "happy",
    "glad",
    "thanks",
    "thank",
    "helpful",
    "perfect",
    "nice",
    "wonderful",
    "fantastic",
    "appreciate",
    "clear",
    "useful",
    "pleased",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad",
    "terrible",
    "awful",
    "horrible",
    "hate",
    "angry",
    "annoyed",
    "annoying",
    "useless",
    "wrong",
    "broken",
    "poor",
    "disappointed",
    "disappointing",
    "frustrated",
    "frustrating",
    "worst",
    "unhappy",
    "confusing",
    "unacceptable",
];

/// Counts positive and negative words. Ties are neutral.
pub struct LexiconClassifier;

impl LexiconClassifier {
    /// Positive hits minus negative hits.
    pub fn score(text: &str) -> i32 {
        text.split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .map(|w| {
                if POSITIVE_WORDS.contains(&w.as_str()) {
                    1
                } else if NEGATIVE_WORDS.contains(&w.as_str()) {
                    -1
                } else {
                    0
                }
            })
            .sum()
    }
}

#[async_trait]
impl SentimentClassifier for LexiconClassifier {
    async fn classify(&self, text: &str) -> Result<Sentiment> {
        Ok(match Self::score(text) {
            s if s > 0 => Sentiment::Positive,
            s if s < 0 => Sentiment::Negative,
            _ => Sentiment::Neutral,
        })
    }
}

pub const SENTIMENT_SYSTEM_PROMPT: &str = "Classify the sentiment of the user's message. \
Reply with exactly one word: positive, neutral, or negative.";

/// Asks the chat model for a one-word label.
pub struct ModelClassifier {
    model: Arc<dyn ChatModel>,
}

impl ModelClassifier {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl SentimentClassifier for ModelClassifier {
    async fn classify(&self, text: &str) -> Result<Sentiment> {
        let messages = [
            ChatMessage::system(SENTIMENT_SYSTEM_PROMPT),
            ChatMessage::user(text),
        ];
        let reply = self.model.complete(&messages, 0.0).await?;
        Sentiment::parse(&reply).ok_or_else(|| {
            Error::Generation(format!("unrecognized sentiment label: {}", reply.trim()))
        })
    }
}

pub struct DisabledClassifier;

#[async_trait]
impl SentimentClassifier for DisabledClassifier {
    async fn classify(&self, _text: &str) -> Result<Sentiment> {
        Err(Error::Generation(
            "sentiment classification is disabled".to_string(),
        ))
    }
}

pub fn create_classifier(
    config: &SentimentConfig,
    model: Arc<dyn ChatModel>,
) -> anyhow::Result<Arc<dyn SentimentClassifier>> {
    match config.provider.as_str() {
        "lexicon" => Ok(Arc::new(LexiconClassifier)),
        "llm" => Ok(Arc::new(ModelClassifier::new(model))),
        "disabled" => Ok(Arc::new(DisabledClassifier)),
        other => anyhow::bail!("Unknown sentiment provider: {}", other),
    }
}

/// One label slot per message, aligned with `conversation.messages`.
///
/// Assistant messages get `None`. A stored label wins; otherwise the user
/// message is classified, and a classifier failure leaves it unlabeled.
pub async fn label_conversation(
    conversation: &Conversation,
    classifier: &dyn SentimentClassifier,
) -> Vec<Option<Sentiment>> {
    let mut labels = Vec::with_capacity(conversation.messages.len());
    for message in &conversation.messages {
        let label = match (message.role, message.sentiment) {
            (Role::Assistant, _) => None,
            (Role::User, Some(stored)) => Some(stored),
            (Role::User, None) => match classifier.classify(&message.content).await {
                Ok(label) => Some(label),
                Err(e) => {
                    debug!(conversation_id = %conversation.id, error = %e, "message left unlabeled");
                    None
                }
            },
        };
        labels.push(label);
    }
    labels
}
