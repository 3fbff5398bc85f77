//! PDF conversation reports.
//!
//! [`render_conversation_pdf`] lays a conversation out on A4 pages using the
//! built-in Helvetica font: a header with the title, id and timestamps, then
//! every question and answer, then a sentiment summary when any user message
//! carries a label. Long lines are word-wrapped and spill onto new pages.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use crate::error::{Error, Result};
use crate::models::{Conversation, Role, Sentiment};

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 50;
const FONT_SIZE: i64 = 11;
const LEADING: i64 = 15;
/// Helvetica at 11pt fits roughly this many characters in the text width.
const WRAP_CHARS: usize = 88;

/// Overall label from a tally: more than one net positive is positive, more
/// than one net negative is negative.
pub fn overall_sentiment(labels: &[Sentiment]) -> Sentiment {
    let score: i64 = labels
        .iter()
        .map(|l| match l {
            Sentiment::Positive => 1,
            Sentiment::Negative => -1,
            Sentiment::Neutral => 0,
        })
        .sum();
    if score > 1 {
        Sentiment::Positive
    } else if score < -1 {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    }
}

/// Renders `conversation` as PDF bytes. `labels` is aligned with
/// `conversation.messages`; missing entries count as unlabeled.
pub fn render_conversation_pdf(
    conversation: &Conversation,
    labels: &[Option<Sentiment>],
) -> Result<Vec<u8>> {
    let lines = report_lines(conversation, labels);
    let lines_per_page = ((PAGE_HEIGHT - 2 * MARGIN) / LEADING) as usize;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut page_ids: Vec<ObjectId> = Vec::new();
    for page_lines in lines.chunks(lines_per_page.max(1)) {
        let content = page_content(page_lines);
        let encoded = content
            .encode()
            .map_err(|e| Error::Storage(format!("failed to encode report page: {}", e)))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        page_ids.push(doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        }));
    }

    let kids: Vec<Object> = page_ids.iter().map(|id| Object::Reference(*id)).collect();
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => Object::Integer(page_ids.len() as i64),
        "Resources" => resources_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(PAGE_WIDTH),
            Object::Integer(PAGE_HEIGHT),
        ],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| Error::Storage(format!("failed to write report: {}", e)))?;
    Ok(out)
}

fn page_content(lines: &[String]) -> Content {
    let mut operations = Vec::with_capacity(lines.len() * 4);
    let mut y = PAGE_HEIGHT - MARGIN;
    for line in lines {
        if !line.is_empty() {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new(
                "Tf",
                vec![Object::Name(b"F1".to_vec()), Object::Integer(FONT_SIZE)],
            ));
            operations.push(Operation::new(
                "Td",
                vec![Object::Integer(MARGIN), Object::Integer(y)],
            ));
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(printable(line))],
            ));
            operations.push(Operation::new("ET", vec![]));
        }
        y -= LEADING;
    }
    Content { operations }
}

/// The standard Type1 fonts only cover Latin-1 reliably.
fn printable(line: &str) -> String {
    line.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect()
}

fn report_lines(conversation: &Conversation, labels: &[Option<Sentiment>]) -> Vec<String> {
    let mut lines = Vec::new();
    push_wrapped(&mut lines, &format!("Conversation report: {}", conversation.title));
    lines.push(format!("Conversation ID: {}", conversation.id));
    lines.push(format!(
        "Created: {}",
        conversation.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    lines.push(format!(
        "Updated: {}",
        conversation.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    lines.push(String::new());

    for (i, message) in conversation.messages.iter().enumerate() {
        let label = labels.get(i).copied().flatten();
        let text = match message.role {
            Role::User => match label {
                Some(l) => format!("You: {} {}", message.content, l.marker()),
                None => format!("You: {}", message.content),
            },
            Role::Assistant => format!("AI: {}", message.content),
        };
        push_wrapped(&mut lines, &text);
        if message.role == Role::Assistant {
            lines.push(String::new());
        }
    }

    let present: Vec<Sentiment> = labels.iter().flatten().copied().collect();
    if !present.is_empty() {
        lines.push(String::new());
        lines.push("Sentiment summary".to_string());
        lines.push(format!(
            "Overall, the user's sentiment in this conversation was {}.",
            overall_sentiment(&present).as_str()
        ));
        for kind in [Sentiment::Positive, Sentiment::Neutral, Sentiment::Negative] {
            let count = present.iter().filter(|l| **l == kind).count();
            let pct = count as f64 * 100.0 / present.len() as f64;
            lines.push(format!(
                "{} {}: {} ({:.1}%)",
                kind.marker(),
                kind.as_str(),
                count,
                pct
            ));
        }
    }
    lines
}

/// Greedy word wrap. Words longer than a line are hard-split.
fn push_wrapped(lines: &mut Vec<String>, text: &str) {
    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > WRAP_CHARS {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                let rest = word.split_off(WRAP_CHARS);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            let word: String = word.into_iter().collect();
            let needed = if current.is_empty() {
                word.chars().count()
            } else {
                current.chars().count() + 1 + word.chars().count()
            };
            if needed > WRAP_CHARS && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&word);
        }
        lines.push(current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMessage;
    use chrono::Utc;

    fn conversation(turns: usize) -> Conversation {
        let now = Utc::now();
        let mut c = Conversation::new("conv-1", now);
        for i in 0..turns {
            c.messages
                .push(NewMessage::user(format!("Question number {}?", i)).into_message(now));
            c.messages.push(
                NewMessage::assistant("An answer that is long enough to wrap. ".repeat(6))
                    .into_message(now),
            );
        }
        c
    }

    #[test]
    fn test_overall_sentiment_thresholds() {
        use Sentiment::*;
        assert_eq!(overall_sentiment(&[Positive, Positive]), Positive);
        assert_eq!(overall_sentiment(&[Positive]), Neutral);
        assert_eq!(overall_sentiment(&[Negative, Negative, Neutral]), Negative);
        assert_eq!(overall_sentiment(&[Negative, Positive, Negative]), Neutral);
        assert_eq!(overall_sentiment(&[]), Neutral);
    }

    #[test]
    fn test_wrap_respects_width() {
        let mut lines = Vec::new();
        push_wrapped(&mut lines, &"word ".repeat(100));
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.chars().count() <= WRAP_CHARS));

        let mut lines = Vec::new();
        push_wrapped(&mut lines, &"x".repeat(200));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_lines_include_markers_and_summary() {
        let c = conversation(2);
        let labels = vec![Some(Sentiment::Positive), None, None, None];
        let lines = report_lines(&c, &labels);
        assert!(lines.iter().any(|l| l == "You: Question number 0? :)"));
        assert!(lines.iter().any(|l| l == "You: Question number 1?"));
        assert!(lines.iter().any(|l| l.starts_with(":) positive: 1 (100.0%)")));
        assert!(lines.iter().any(|l| l.contains("sentiment in this conversation was neutral")));
    }

    #[test]
    fn test_no_summary_without_labels() {
        let c = conversation(1);
        let lines = report_lines(&c, &[]);
        assert!(!lines.iter().any(|l| l == "Sentiment summary"));
    }

    #[test]
    fn test_render_paginates() {
        let short = render_conversation_pdf(&conversation(1), &[]).unwrap();
        let doc = Document::load_mem(&short).unwrap();
        assert_eq!(doc.get_pages().len(), 1);

        let long = render_conversation_pdf(&conversation(30), &[]).unwrap();
        let doc = Document::load_mem(&long).unwrap();
        assert!(doc.get_pages().len() >= 2);
    }

    #[test]
    fn test_render_empty_conversation() {
        let c = Conversation::new("empty", Utc::now());
        let bytes = render_conversation_pdf(&c, &[]).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
    }
}
