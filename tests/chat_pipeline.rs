mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use common::*;
use docchat::answer::FALLBACK_ANSWER;
use docchat::app::AppContext;
use docchat::chat::AskRequest;
use docchat::chunk::chunk_text;
use docchat::error::Error;
use docchat::models::{Role, VectorPoint};
use docchat::store::Metric;

async fn seed(ctx: &AppContext, document_id: &str, text: &str) {
    let chunks = chunk_text(document_id, text, 800, 100).unwrap();
    let collection = ctx.config.retrieval.collection.clone();
    ctx.index
        .ensure_collection(&collection, HASH_DIMS, Metric::Cosine)
        .await
        .unwrap();
    let points: Vec<VectorPoint> = chunks
        .iter()
        .map(|c| VectorPoint {
            id: c.id.clone(),
            vector: hash_vector(&c.text),
            document_id: c.document_id.clone(),
            chunk_index: c.chunk_index,
            text: c.text.clone(),
        })
        .collect();
    ctx.index.upsert(&collection, &points).await.unwrap();
}

/// Rewrites electronics follow-ups and answers from whatever context it gets.
fn refund_model() -> Arc<ScriptedModel> {
    ScriptedModel::new(|messages| {
        let last = last_user_content(messages);
        if is_rewrite_call(messages) {
            if last.contains("electronics") {
                return Ok("What is the refund window for electronics?".to_string());
            }
            return Ok(last);
        }
        if last.contains("15 days") && last.contains("electronics") {
            Ok("Unopened electronics can be returned within 15 days.".to_string())
        } else {
            Ok("Most items can be returned within 30 days.".to_string())
        }
    })
}

#[tokio::test]
async fn test_follow_up_is_rewritten_into_standalone_question() {
    let tmp = TempDir::new().unwrap();
    let model = refund_model();
    let ctx = memory_context(&tmp, Arc::new(HashEmbedder), model.clone());
    seed(&ctx, "policy", REFUND_POLICY).await;

    let first = ctx
        .chat
        .ask(AskRequest::new("What is the refund policy?"))
        .await
        .unwrap();
    assert_eq!(first.rewrite, None);
    assert!(first.chunks_used > 0);
    // Empty history: only the answer call.
    assert_eq!(model.calls(), 1);

    let second = ctx
        .chat
        .ask(AskRequest::new("What about for electronics?").in_conversation(&first.conversation_id))
        .await
        .unwrap();
    assert_eq!(second.conversation_id, first.conversation_id);
    let rewrite = second.rewrite.clone().unwrap();
    assert!(rewrite.ends_with('?'));
    assert!(!rewrite.contains("30 days"));
    assert!(second.answer.contains("15 days"));
    assert_eq!(model.calls(), 3);

    let conversation = ctx
        .conversations
        .get(&first.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.messages.len(), 4);
    assert_eq!(conversation.messages[2].role, Role::User);
    assert_eq!(conversation.messages[2].content, "What about for electronics?");
    assert_eq!(conversation.messages[2].rewrite.as_deref(), Some(rewrite.as_str()));
    assert_eq!(conversation.messages[3].role, Role::Assistant);
    assert_eq!(conversation.messages[3].rewrite, None);
}

#[tokio::test]
async fn test_answering_rewrite_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let model = ScriptedModel::new(|messages| {
        if is_rewrite_call(messages) {
            Ok("Electronics can be returned within 15 days.".to_string())
        } else {
            Ok("Within 15 days if unopened.".to_string())
        }
    });
    let ctx = memory_context(&tmp, Arc::new(HashEmbedder), model.clone());
    seed(&ctx, "policy", REFUND_POLICY).await;

    let first = ctx
        .chat
        .ask(AskRequest::new("What is the refund policy?"))
        .await
        .unwrap();
    let second = ctx
        .chat
        .ask(AskRequest::new("What about for electronics?").in_conversation(&first.conversation_id))
        .await
        .unwrap();

    assert_eq!(second.rewrite, None);
    let requests = model.requests();
    let answer_request = requests.last().unwrap();
    assert!(last_user_content(answer_request).ends_with("What about for electronics?"));
}

#[tokio::test]
async fn test_empty_index_returns_fallback_without_model_call() {
    let tmp = TempDir::new().unwrap();
    let model = ScriptedModel::constant("should not be called");
    let ctx = memory_context(&tmp, Arc::new(HashEmbedder), model.clone());

    let turn = ctx
        .chat
        .ask(AskRequest::new("What is the refund policy?"))
        .await
        .unwrap();
    assert_eq!(turn.answer, FALLBACK_ANSWER);
    assert_eq!(turn.chunks_used, 0);
    assert_eq!(model.calls(), 0);

    let conversation = ctx
        .conversations
        .get(&turn.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[1].content, FALLBACK_ANSWER);
}

#[tokio::test]
async fn test_rewrite_failure_falls_back_to_original_question() {
    let tmp = TempDir::new().unwrap();
    let model = ScriptedModel::new(|messages| {
        if is_rewrite_call(messages) {
            Err(Error::Generation("rate limited".to_string()))
        } else {
            Ok("Most items can be returned within 30 days.".to_string())
        }
    });
    let ctx = memory_context(&tmp, Arc::new(HashEmbedder), model.clone());
    seed(&ctx, "policy", REFUND_POLICY).await;

    let first = ctx
        .chat
        .ask(AskRequest::new("What is the refund policy?"))
        .await
        .unwrap();
    let second = ctx
        .chat
        .ask(AskRequest::new("And gift cards?").in_conversation(&first.conversation_id))
        .await
        .unwrap();

    assert_eq!(second.rewrite, None);
    assert_eq!(second.question, "And gift cards?");
    let conversation = ctx
        .conversations
        .get(&first.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.messages.len(), 4);
}

#[tokio::test]
async fn test_generation_failure_persists_nothing() {
    let tmp = TempDir::new().unwrap();
    let fail = Arc::new(AtomicBool::new(false));
    let flag = fail.clone();
    let model = ScriptedModel::new(move |messages| {
        if is_rewrite_call(messages) {
            return Ok(last_user_content(messages));
        }
        if flag.load(Ordering::SeqCst) {
            Err(Error::Generation("upstream 500".to_string()))
        } else {
            Ok("Within 30 days.".to_string())
        }
    });
    let ctx = memory_context(&tmp, Arc::new(HashEmbedder), model);
    seed(&ctx, "policy", REFUND_POLICY).await;

    let first = ctx
        .chat
        .ask(AskRequest::new("What is the refund policy?"))
        .await
        .unwrap();

    fail.store(true, Ordering::SeqCst);
    let err = ctx
        .chat
        .ask(AskRequest::new("Are gift cards refundable?").in_conversation(&first.conversation_id))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Generation(_)));

    let conversation = ctx
        .conversations
        .get(&first.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.messages.len(), 2);
}

#[tokio::test]
async fn test_retrieval_failure_persists_nothing() {
    let tmp = TempDir::new().unwrap();
    let ctx = memory_context(
        &tmp,
        Arc::new(FailingEmbedder),
        ScriptedModel::constant("unused"),
    );

    let err = ctx
        .chat
        .ask(AskRequest::new("What is the refund policy?").in_conversation("conv-x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Embedding(_)));
    assert!(ctx.conversations.get("conv-x").await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let model = ScriptedModel::constant("unused");
    let ctx = memory_context(&tmp, Arc::new(HashEmbedder), model.clone());

    let err = ctx.chat.ask(AskRequest::new("   ")).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let mut request = AskRequest::new("What is the refund policy?");
    request.top_k = Some(0);
    let err = ctx.chat.ask(request).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert_eq!(model.calls(), 0);
    assert!(ctx.conversations.list(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_history_is_capped_across_turns() {
    let tmp = TempDir::new().unwrap();
    let ctx = memory_context(
        &tmp,
        Arc::new(HashEmbedder),
        ScriptedModel::new(|messages| Ok(last_user_content(messages))),
    );

    let first = ctx.chat.ask(AskRequest::new("Question 0?")).await.unwrap();
    let id = first.conversation_id;
    for i in 1..7 {
        ctx.chat
            .ask(AskRequest::new(format!("Question {}?", i)).in_conversation(&id))
            .await
            .unwrap();
        let conversation = ctx.conversations.get(&id).await.unwrap().unwrap();
        assert!(conversation.messages.len() <= 10);
    }

    let conversation = ctx.conversations.get(&id).await.unwrap().unwrap();
    assert_eq!(conversation.messages.len(), 10);
    assert_eq!(conversation.messages[0].content, "Question 2?");
    assert_eq!(conversation.messages[9].role, Role::Assistant);
}

#[tokio::test]
async fn test_rename_and_delete_through_context() {
    let tmp = TempDir::new().unwrap();
    let ctx = memory_context(&tmp, Arc::new(HashEmbedder), ScriptedModel::constant("ok"));

    let a = ctx.chat.ask(AskRequest::new("First?")).await.unwrap();
    let b = ctx.chat.ask(AskRequest::new("Second?")).await.unwrap();
    let listed = ctx.conversations.list(20).await.unwrap();
    assert_eq!(listed[0].conversation_id, b.conversation_id);

    ctx.conversations
        .rename(&a.conversation_id, "Refunds")
        .await
        .unwrap();
    let listed = ctx.conversations.list(20).await.unwrap();
    assert_eq!(listed[0].conversation_id, a.conversation_id);
    assert_eq!(listed[0].title, "Refunds");

    ctx.conversations.delete(&a.conversation_id).await.unwrap();
    for _ in 0..2 {
        let err = ctx
            .conversations
            .delete(&a.conversation_id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
