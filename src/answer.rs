//! Grounded answer generation.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::llm::{ChatMessage, ChatModel};
use crate::models::Message;

/// Returned, without a model call, when retrieval found nothing.
pub const FALLBACK_ANSWER: &str = "I do not know based on the provided documents.";

/// Separator between chunks in the grounding context.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

pub const ANSWER_SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions about \
the user's documents. Use the provided context as the primary source of truth. You may perform \
simple transformations of values found in the context, such as arithmetic, unit conversions or \
currency conversions. Do not introduce facts that are not supported by the context. If the \
context is not relevant to the question, say that you do not know.";

pub struct AnswerGenerator {
    model: Arc<dyn ChatModel>,
    history_window: usize,
    temperature: f32,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn ChatModel>, history_window: usize, temperature: f32) -> Self {
        Self {
            model,
            history_window,
            temperature,
        }
    }

    /// Answer `question` from `context_chunks`, with the last few messages
    /// of `history` for continuity.
    ///
    /// # Errors
    ///
    /// `Generation` when the model fails or returns an empty completion.
    pub async fn generate(
        &self,
        question: &str,
        context_chunks: &[String],
        history: &[Message],
    ) -> Result<String> {
        if context_chunks.is_empty() {
            return Ok(FALLBACK_ANSWER.to_string());
        }

        let recent = &history[history.len().saturating_sub(self.history_window)..];
        let mut messages = Vec::with_capacity(recent.len() + 2);
        messages.push(ChatMessage::system(ANSWER_SYSTEM_PROMPT));
        messages.extend(recent.iter().map(ChatMessage::from));
        messages.push(ChatMessage::user(format!(
            "Context:\n{}\n\nQuestion:\n{}",
            context_chunks.join(CHUNK_SEPARATOR),
            question
        )));

        let answer = self.model.complete(&messages, self.temperature).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(Error::Generation(
                "model returned an empty answer".to_string(),
            ));
        }
        Ok(answer.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    use crate::models::NewMessage;

    struct Recorder {
        reply: String,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Recorder {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for Recorder {
        fn model_name(&self) -> &str {
            "recorder"
        }

        async fn complete(&self, messages: &[ChatMessage], _temperature: f32) -> Result<String> {
            self.requests.lock().unwrap().push(messages.to_vec());
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_no_chunks_returns_fallback_without_call() {
        let model = Recorder::new("unused");
        let generator = AnswerGenerator::new(model.clone(), 4, 0.2);
        let answer = generator.generate("What?", &[], &[]).await.unwrap();
        assert_eq!(answer, FALLBACK_ANSWER);
        assert!(model.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_layout() {
        let model = Recorder::new("  Within 30 days.  ");
        let generator = AnswerGenerator::new(model.clone(), 2, 0.2);
        let now = Utc::now();
        let history = vec![
            NewMessage::user("old question").into_message(now),
            NewMessage::assistant("old answer").into_message(now),
            NewMessage::user("recent question").into_message(now),
        ];
        let chunks = vec!["chunk one".to_string(), "chunk two".to_string()];

        let answer = generator
            .generate("What is the refund window?", &chunks, &history)
            .await
            .unwrap();
        assert_eq!(answer, "Within 30 days.");

        let requests = model.requests.lock().unwrap();
        let sent = &requests[0];
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0].content, ANSWER_SYSTEM_PROMPT);
        assert_eq!(sent[1].content, "old answer");
        assert_eq!(sent[2].content, "recent question");
        assert_eq!(
            sent[3].content,
            "Context:\nchunk one\n\n---\n\nchunk two\n\nQuestion:\nWhat is the refund window?"
        );
    }

    #[tokio::test]
    async fn test_empty_completion_is_error() {
        let generator = AnswerGenerator::new(Recorder::new("   "), 4, 0.2);
        let err = generator
            .generate("What?", &["chunk".to_string()], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }
}
