mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use common::*;
use docchat::app::AppContext;
use docchat::server::build_router;

const BOUNDARY: &str = "docchat-test-boundary";

fn router_with(tmp: &TempDir, max_upload_bytes: usize) -> Router {
    let mut config = test_config(tmp);
    config.storage.max_upload_bytes = max_upload_bytes;
    let model = ScriptedModel::new(|messages| {
        if is_rewrite_call(messages) {
            return Ok(last_user_content(messages));
        }
        if last_user_content(messages).contains("refund window phrase") {
            Ok("The refund window is described in the document.".to_string())
        } else {
            Ok("I do not know.".to_string())
        }
    });
    let ctx = AppContext::in_memory(config, Arc::new(HashEmbedder), model).unwrap();
    build_router(Arc::new(ctx))
}

fn router(tmp: &TempDir) -> Router {
    router_with(tmp, 20 * 1024 * 1024)
}

fn multipart_body(filename: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            BOUNDARY, filename, content_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/pdf/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, request).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Upload, extract and embed the standard test PDF. Returns its id.
async fn index_document(app: &Router) -> String {
    let pdf = minimal_pdf_with_text("refund window phrase");
    let (status, doc) = send_json(
        app,
        upload_request(multipart_body("policy.pdf", "application/pdf", &pdf)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", doc);
    let id = doc["id"].as_str().unwrap().to_string();

    let (status, body) = send_json(app, empty_request("POST", &format!("/pdf/{}/extract", id))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "EXTRACTED");

    let (status, body) = send_json(app, empty_request("POST", &format!("/embeddings/{}", id))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["chunks"], 1);
    id
}

#[tokio::test]
async fn test_health() {
    let tmp = TempDir::new().unwrap();
    let app = router(&tmp);

    let (status, body) = send_json(&app, empty_request("GET", "/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let (status, body) = send_json(&app, empty_request("GET", "/index/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["backend"], "memory");
    assert_eq!(body["points"], 0);
}

#[tokio::test]
async fn test_upload_list_and_duplicate() {
    let tmp = TempDir::new().unwrap();
    let app = router(&tmp);
    let pdf = minimal_pdf_with_text("refund window phrase");

    let (status, doc) = send_json(
        &app,
        upload_request(multipart_body("policy.pdf", "application/pdf", &pdf)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(doc["status"], "UPLOADED");
    assert_eq!(doc["filename"], "policy.pdf");

    let (status, body) = send_json(
        &app,
        upload_request(multipart_body("again.pdf", "application/pdf", &pdf)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "duplicate");

    let (status, list) = send_json(&app, empty_request("GET", "/pdf/list")).await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], doc["id"]);
    assert!(list[0].get("extracted_text").is_none());
}

#[tokio::test]
async fn test_upload_rejections() {
    let tmp = TempDir::new().unwrap();
    let app = router_with(&tmp, 1024);

    let (status, body) = send_json(
        &app,
        upload_request(multipart_body("notes.txt", "text/plain", b"hello")),
    )
    .await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["error"]["code"], "unsupported_media_type");

    let mut big = minimal_pdf_with_text("phrase");
    big.resize(4096, b' ');
    let (status, body) = send_json(
        &app,
        upload_request(multipart_body("big.pdf", "application/pdf", &big)),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"]["code"], "payload_too_large");

    let no_file = format!(
        "--{}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nvalue\r\n--{}--\r\n",
        BOUNDARY, BOUNDARY
    );
    let (status, body) = send_json(&app, upload_request(no_file.into_bytes())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_chat_conversation_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let app = router(&tmp);
    index_document(&app).await;

    let (status, turn) = send_json(
        &app,
        json_request("POST", "/chat", json!({"question": "What is the refund window?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", turn);
    assert_eq!(turn["answer"], "The refund window is described in the document.");
    assert_eq!(turn["chunks_used"], 1);
    let id = turn["conversation_id"].as_str().unwrap().to_string();

    let (status, latest) = send_json(&app, empty_request("GET", "/chat/latest")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["conversation_id"], id.as_str());
    assert_eq!(latest["messages"].as_array().unwrap().len(), 2);

    let (status, renamed) = send_json(
        &app,
        json_request("PATCH", &format!("/chat/{}", id), json!({"title": "Refunds"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["title"], "Refunds");

    let (status, list) = send_json(&app, empty_request("GET", "/chat/conversations")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list[0]["conversation_id"], id.as_str());
    assert_eq!(list[0]["title"], "Refunds");

    let (status, conversation) =
        send_json(&app, empty_request("GET", &format!("/chat/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(conversation["messages"][0]["role"], "user");
    assert_eq!(conversation["messages"][1]["role"], "assistant");

    let resp = app
        .clone()
        .oneshot(empty_request("GET", &format!("/chat/{}/report", id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/pdf"
    );
    let pdf = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(pdf.starts_with(b"%PDF"));

    let (status, _) = send(&app, empty_request("DELETE", &format!("/chat/{}", id))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = send_json(&app, empty_request("DELETE", &format!("/chat/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_latest_is_null_without_conversations() {
    let tmp = TempDir::new().unwrap();
    let app = router(&tmp);

    let (status, body) = send_json(&app, empty_request("GET", "/chat/latest")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_null());
}

#[tokio::test]
async fn test_validation_errors() {
    let tmp = TempDir::new().unwrap();
    let app = router(&tmp);

    let (status, body) =
        send_json(&app, json_request("POST", "/chat", json!({"question": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = send_json(
        &app,
        json_request("POST", "/search", json!({"query": "refund", "top_k": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = send_json(
        &app,
        json_request("PATCH", "/chat/missing", json!({"title": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = send_json(&app, empty_request("POST", "/embeddings/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_search_and_document_delete() {
    let tmp = TempDir::new().unwrap();
    let app = router(&tmp);
    let id = index_document(&app).await;

    let (status, body) = send_json(
        &app,
        json_request("POST", "/search", json!({"query": "refund window"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["document_id"], id.as_str());

    let (status, _) = send(&app, empty_request("DELETE", &format!("/pdf/{}", id))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send_json(
        &app,
        json_request("POST", "/search", json!({"query": "refund window"})),
    )
    .await;
    assert!(body["results"].as_array().unwrap().is_empty());
}
