//! Follow-up question rewriting.
//!
//! Turns a context-dependent follow-up ("What about for electronics?") into
//! a self-contained query ("What is the refund window for electronics?")
//! using the last few messages of the conversation.
//!
//! The model output is checked before it is used. A rewrite is discarded in
//! favour of the original question when it is empty, spans several lines,
//! or states something before asking. It must also be a question, unless the
//! original is a request whose opening verb the rewrite keeps.
//! These checks keep the contract (self-contained, interrogative, never an
//! answer) independent of what the model returns.
//!
//! Requests that are not questions ("Summarize that", "Convert it to
//! euros") are rewritten into self-contained requests that keep their
//! imperative form.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::llm::{ChatMessage, ChatModel};
use crate::models::{Message, Role};

pub const REWRITE_SYSTEM_PROMPT: &str = "Rewrite the user's latest question into a fully \
self-contained question using the prior messages as context. Resolve references such as \
\"it\", \"that\" or \"the same\" to what they refer to. If the latest message is a request, \
for example to summarize, translate or convert something, rewrite it as a self-contained \
request and keep it a request. Never answer the question and never add facts from earlier \
answers. If the question is already self-contained, return it unchanged. Reply with the \
rewritten question only, on a single line.";

/// Words that open a question even without a trailing `?`.
const QUESTION_OPENERS: &[&str] = &[
    "what", "why", "how", "when", "where", "which", "who", "whom", "whose", "is", "are", "was",
    "were", "am", "do", "does", "did", "can", "could", "should", "would", "will", "shall", "may",
    "might", "must", "has", "have", "had",
];

/// Verbs that open a request the rewrite may keep as a request.
const REQUEST_OPENERS: &[&str] = &[
    "summarize", "summarise", "explain", "describe", "list", "tell", "show", "give", "compare",
    "outline", "define", "clarify", "elaborate", "expand", "find", "provide", "rephrase",
    "translate", "convert", "calculate",
];

/// Labels models sometimes put in front of the rewrite.
const LABELS: &[&str] = &[
    "rewritten question:",
    "rewritten query:",
    "rewritten:",
    "rewrite:",
    "question:",
    "query:",
];

/// Result of [`QueryRewriter::rewrite`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub text: String,
    /// False when `text` is the original question.
    pub was_rewritten: bool,
}

impl Rewrite {
    pub fn unchanged(question: &str) -> Self {
        Self {
            text: question.to_string(),
            was_rewritten: false,
        }
    }
}

pub struct QueryRewriter {
    model: Arc<dyn ChatModel>,
    window: usize,
    temperature: f32,
}

impl QueryRewriter {
    /// `window` is the number of most recent messages given to the model.
    pub fn new(model: Arc<dyn ChatModel>, window: usize, temperature: f32) -> Self {
        Self {
            model,
            window,
            temperature,
        }
    }

    /// Rewrite `question` against `history`.
    ///
    /// Empty history returns the question unchanged without a model call.
    ///
    /// # Errors
    ///
    /// `Generation` when the model call fails. Callers fall back to the
    /// original question.
    pub async fn rewrite(&self, question: &str, history: &[Message]) -> Result<Rewrite> {
        if history.is_empty() || self.window == 0 {
            return Ok(Rewrite::unchanged(question));
        }

        let recent = &history[history.len().saturating_sub(self.window)..];
        let mut messages = Vec::with_capacity(recent.len() + 2);
        messages.push(ChatMessage::system(REWRITE_SYSTEM_PROMPT));
        for msg in recent {
            let text = msg.effective_text().to_string();
            messages.push(match msg.role {
                Role::User => ChatMessage::user(text),
                Role::Assistant => ChatMessage::assistant(text),
            });
        }
        messages.push(ChatMessage::user(question));

        let raw = self.model.complete(&messages, self.temperature).await?;
        let rewrite = accept_rewrite(question, &raw);
        debug!(
            was_rewritten = rewrite.was_rewritten,
            rewrite = %rewrite.text,
            "rewrote question"
        );
        Ok(rewrite)
    }
}

/// Validates model output for `question`, falling back to the question.
pub fn accept_rewrite(question: &str, raw: &str) -> Rewrite {
    let candidate = clean_output(raw);

    let rejection = if candidate.is_empty() {
        Some("empty")
    } else if candidate.contains('\n') {
        Some("multi-line")
    } else if has_leading_statement(&candidate) {
        Some("states something before asking")
    } else if !is_interrogative(&candidate) && !keeps_request_verb(question, &candidate) {
        Some("not a question")
    } else {
        None
    };

    if let Some(reason) = rejection {
        warn!(reason, output = %raw, "discarding rewrite");
        return Rewrite::unchanged(question);
    }

    if normalize_whitespace(&candidate) == normalize_whitespace(question) {
        return Rewrite::unchanged(question);
    }

    Rewrite {
        text: candidate,
        was_rewritten: true,
    }
}

fn clean_output(raw: &str) -> String {
    let mut text = raw.trim();

    for label in LABELS {
        if text.len() >= label.len()
            && text.is_char_boundary(label.len())
            && text[..label.len()].eq_ignore_ascii_case(label)
        {
            text = text[label.len()..].trim_start();
            break;
        }
    }

    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”'), ('`', '`')] {
        if text.len() > 1 && text.starts_with(open) && text.ends_with(close) {
            text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
            break;
        }
    }

    text.to_string()
}

/// True for text ending in `?` or opening with a question word.
pub fn is_interrogative(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.ends_with('?') {
        return true;
    }
    first_word(trimmed).is_some_and(|w| QUESTION_OPENERS.contains(&w.as_str()))
}

fn first_word(text: &str) -> Option<String> {
    text.split_whitespace().next().map(|w| {
        w.trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase()
    })
}

/// True when `question` opens with a request verb and `candidate` opens
/// with the same verb.
fn keeps_request_verb(question: &str, candidate: &str) -> bool {
    match (first_word(question), first_word(candidate)) {
        (Some(q), Some(c)) => q == c && REQUEST_OPENERS.contains(&q.as_str()),
        _ => false,
    }
}

/// Detects "The window is 30 days. What about electronics?" style output.
fn has_leading_statement(text: &str) -> bool {
    let body = text.trim().trim_end_matches(['?', '.', '!']);
    let words: Vec<&str> = body.split_whitespace().collect();
    words.windows(2).any(|pair| {
        ends_sentence(pair[0]) && pair[1].chars().next().is_some_and(char::is_uppercase)
    })
}

/// "days." and "great!" end a sentence; "U.S." and "e." do not.
fn ends_sentence(word: &str) -> bool {
    if word.ends_with('!') {
        return true;
    }
    match word.strip_suffix('.') {
        Some(stem) => {
            !stem.contains('.') && stem.chars().filter(|c| c.is_alphabetic()).count() > 1
        }
        None => false,
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
