//! HTTP API.
//!
//! Exposes the document and chat pipelines as a JSON API over axum.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/index/health` | Vector index status |
//! | `POST`   | `/chat` | Run one chat turn |
//! | `GET`    | `/chat/latest` | Most recent conversation |
//! | `GET`    | `/chat/conversations` | Conversation list, newest first |
//! | `GET`    | `/chat/{id}` | One conversation |
//! | `PATCH`  | `/chat/{id}` | Rename |
//! | `DELETE` | `/chat/{id}` | Delete |
//! | `GET`    | `/chat/{id}/report` | PDF report |
//! | `POST`   | `/pdf/upload` | Multipart upload, field `file` |
//! | `GET`    | `/pdf/list` | Uploaded documents |
//! | `POST`   | `/pdf/{id}/extract` | Extract text |
//! | `DELETE` | `/pdf/{id}` | Delete document, file and vectors |
//! | `POST`   | `/embeddings/{id}` | Chunk, embed and index a document |
//! | `POST`   | `/search` | Raw similarity search |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "conversation abc" } }
//! ```
//!
//! Codes follow [`Error::code`]; oversized uploads answer
//! `413 payload_too_large`.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::app::AppContext;
use crate::chat::AskRequest;
use crate::config::Config;
use crate::documents::EmbedReport;
use crate::error::Error;
use crate::models::{
    ChatTurn, Conversation, DocumentStatus, DocumentSummary, Message, RetrievedChunk,
};
use crate::report::render_conversation_pdf;
use crate::sentiment::label_conversation;
use crate::store::IndexHealth;

/// Messages returned by `GET /chat/latest`.
const LATEST_MESSAGES: usize = 10;

/// Multipart framing overhead allowed on top of the file size limit.
const MULTIPART_SLACK_BYTES: usize = 64 * 1024;

type AppState = Arc<AppContext>;

/// Binds to `[server].bind` and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let ctx = Arc::new(AppContext::from_config(config).await?);
    let bind_addr = config.server.bind.clone();
    let app = build_router(ctx);

    info!(bind = %bind_addr, "server listening");
    println!("docchat listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// The full router with CORS, tracing and the upload body limit applied.
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let body_limit = ctx.config.storage.max_upload_bytes + MULTIPART_SLACK_BYTES;

    Router::new()
        .route("/health", get(handle_health))
        .route("/index/health", get(handle_index_health))
        .route("/chat", post(handle_chat))
        .route("/chat/latest", get(handle_latest))
        .route("/chat/conversations", get(handle_list_conversations))
        .route(
            "/chat/{id}",
            get(handle_get_conversation)
                .patch(handle_rename)
                .delete(handle_delete_conversation),
        )
        .route("/chat/{id}/report", get(handle_report))
        .route("/pdf/upload", post(handle_upload))
        .route("/pdf/list", get(handle_list_documents))
        .route("/pdf/{id}/extract", post(handle_extract))
        .route("/pdf/{id}", axum::routing::delete(handle_delete_document))
        .route("/embeddings/{id}", post(handle_embed))
        .route("/search", post(handle_search))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(&ctx.config))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    let origins: Vec<HeaderValue> = config
        .server
        .cors_allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Converts pipeline errors into JSON error responses.
struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::DuplicateResource(_) => StatusCode::CONFLICT,
            Error::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Embedding(_) | Error::Generation(_) => StatusCode::BAD_GATEWAY,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(code = err.code(), error = %err, "request failed");
        }
        Self {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn payload_too_large(limit: usize) -> ApiError {
    ApiError {
        status: StatusCode::PAYLOAD_TOO_LARGE,
        code: "payload_too_large".to_string(),
        message: format!("upload exceeds the {} byte limit", limit),
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============ Health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct IndexHealthResponse {
    status: String,
    #[serde(flatten)]
    index: IndexHealth,
}

async fn handle_index_health(State(ctx): State<AppState>) -> ApiResult<Json<IndexHealthResponse>> {
    let index = ctx.index.health().await?;
    Ok(Json(IndexHealthResponse {
        status: "ok".to_string(),
        index,
    }))
}

// ============ Chat ============

async fn handle_chat(
    State(ctx): State<AppState>,
    Json(request): Json<AskRequest>,
) -> ApiResult<Json<ChatTurn>> {
    Ok(Json(ctx.chat.ask(request).await?))
}

#[derive(Serialize)]
struct ConversationView {
    conversation_id: String,
    title: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    messages: Vec<Message>,
}

impl ConversationView {
    fn new(conversation: Conversation, last: Option<usize>) -> Self {
        let mut messages = conversation.messages;
        if let Some(n) = last {
            let skip = messages.len().saturating_sub(n);
            messages.drain(..skip);
        }
        Self {
            conversation_id: conversation.id,
            title: conversation.title,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            messages,
        }
    }
}

/// `null` when no conversation exists yet.
async fn handle_latest(State(ctx): State<AppState>) -> ApiResult<Json<Option<ConversationView>>> {
    let latest = ctx.conversations.latest().await?;
    Ok(Json(
        latest.map(|c| ConversationView::new(c, Some(LATEST_MESSAGES))),
    ))
}

#[derive(Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ConversationListEntry {
    conversation_id: String,
    title: String,
    updated_at: DateTime<Utc>,
}

async fn handle_list_conversations(
    State(ctx): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<ConversationListEntry>>> {
    let limit = params.limit.unwrap_or(ctx.config.conversation.list_limit);
    let summaries = ctx.conversations.list(limit).await?;
    Ok(Json(
        summaries
            .into_iter()
            .map(|s| ConversationListEntry {
                conversation_id: s.conversation_id,
                title: s.title,
                updated_at: s.updated_at,
            })
            .collect(),
    ))
}

async fn load_conversation(ctx: &AppContext, id: &str) -> ApiResult<Conversation> {
    ctx.conversations
        .get(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("conversation {}", id)).into())
}

async fn handle_get_conversation(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ConversationView>> {
    let conversation = load_conversation(&ctx, &id).await?;
    Ok(Json(ConversationView::new(conversation, None)))
}

#[derive(Deserialize)]
struct RenameRequest {
    title: String,
}

#[derive(Serialize)]
struct RenameResponse {
    conversation_id: String,
    title: String,
}

async fn handle_rename(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> ApiResult<Json<RenameResponse>> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(Error::Validation("title must not be empty".to_string()).into());
    }
    ctx.conversations.rename(&id, title).await?;
    Ok(Json(RenameResponse {
        conversation_id: id,
        title: title.to_string(),
    }))
}

async fn handle_delete_conversation(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    ctx.conversations.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_report(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conversation = load_conversation(&ctx, &id).await?;
    let labels = label_conversation(&conversation, ctx.sentiment.as_ref()).await;
    let pdf = render_conversation_pdf(&conversation, &labels)?;

    let disposition = format!("attachment; filename=\"conversation-{}.pdf\"", id);
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        pdf,
    )
        .into_response())
}

// ============ Documents ============

async fn handle_upload(
    State(ctx): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<DocumentSummary>)> {
    let limit = ctx.config.storage.max_upload_bytes;
    let multipart_error = |e: axum::extract::multipart::MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            payload_too_large(limit)
        } else {
            ApiError::from(Error::Validation(format!("invalid multipart body: {}", e.body_text())))
        }
    };

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        if bytes.len() > limit {
            return Err(payload_too_large(limit));
        }

        let doc = ctx
            .documents
            .upload(&filename, content_type.as_deref(), bytes.to_vec())
            .await?;
        return Ok((StatusCode::CREATED, Json(DocumentSummary::from(&doc))));
    }

    Err(Error::Validation("multipart field \"file\" is required".to_string()).into())
}

async fn handle_list_documents(
    State(ctx): State<AppState>,
) -> ApiResult<Json<Vec<DocumentSummary>>> {
    let docs = ctx.documents.list().await?;
    Ok(Json(docs.iter().map(DocumentSummary::from).collect()))
}

#[derive(Serialize)]
struct ExtractResponse {
    document_id: String,
    status: DocumentStatus,
    characters: usize,
}

async fn handle_extract(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExtractResponse>> {
    let doc = ctx.documents.extract(&id).await?;
    Ok(Json(ExtractResponse {
        characters: doc
            .extracted_text
            .as_deref()
            .map(|t| t.chars().count())
            .unwrap_or(0),
        document_id: doc.id,
        status: doc.status,
    }))
}

async fn handle_delete_document(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    ctx.documents.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_embed(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EmbedReport>> {
    Ok(Json(ctx.documents.embed(&id).await?))
}

// ============ Search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<RetrievedChunk>,
}

async fn handle_search(
    State(ctx): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let top_k = request.top_k.unwrap_or(ctx.config.retrieval.top_k);
    let results = ctx.chat.retriever().retrieve(&request.query, top_k).await?;
    Ok(Json(SearchResponse { results }))
}
