//! Handlers for every `/api/*` endpoint (§4.10)

use super::{ApiResult, AppState};
use crate::error::WhereSpaceError;
use crate::model_client::ChatOptions;
use crate::retriever::RankedHit;
use crate::scanner;
use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub current_model: String,
    pub document_count: i64,
    pub chunk_count: i64,
    pub cache_size: usize,
    pub cache_hit_rate: f64,
}

#[utoipa::path(get, path = "/api/status", tag = "status", responses((status = 200, body = StatusResponse)))]
pub async fn status_handler(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let document_count = state.store.count_documents().await?;
    let chunk_count = state.store.count_chunks().await?;
    let cache_stats = state.query_cache.stats();

    Ok(Json(StatusResponse {
        current_model: state.model_state.current(),
        document_count,
        chunk_count,
        cache_size: cache_stats.size,
        cache_hit_rate: cache_stats.hit_rate(),
    }))
}

#[utoipa::path(get, path = "/api/models", tag = "status", responses((status = 200, description = "Installed model catalog, grouped by family")))]
pub async fn models_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<crate::model_catalog::ModelCatalog>> {
    let catalog = state.model_catalog.fetch().await?;
    Ok(Json(catalog))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetModelRequest {
    pub model: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SetModelResponse {
    pub success: bool,
    pub model: String,
    pub verified: bool,
}

#[utoipa::path(post, path = "/api/set_model", tag = "status", request_body = SetModelRequest, responses((status = 200, body = SetModelResponse, description = "Model switched"), (status = 404, description = "Model not installed")))]
pub async fn set_model_handler(
    State(state): State<AppState>,
    Json(request): Json<SetModelRequest>,
) -> ApiResult<Json<SetModelResponse>> {
    state.model_catalog.validate(&request.model).await?;
    // `set_current` only returns `Ok` after its own triple write/read-back/
    // reload verification (§4.9) passes, so reaching here means verified.
    state.model_state.set_current(request.model.clone()).await?;
    Ok(Json(SetModelResponse {
        success: true,
        model: request.model,
        verified: true,
    }))
}

#[utoipa::path(get, path = "/api/list_documents", tag = "documents", responses((status = 200, description = "All ingested documents")))]
pub async fn list_documents_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<crate::vector_store::DocSummary>>> {
    let docs = state.store.list_documents().await?;
    Ok(Json(docs))
}

#[utoipa::path(post, path = "/api/flush_documents", tag = "documents", responses((status = 200, description = "All documents and cached queries cleared")))]
pub async fn flush_documents_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted = state.store.flush_all().await?;
    state.query_cache.clear();
    Ok(Json(serde_json::json!({ "deleted_chunks": deleted })))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub file_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueryStreamMeta {
    citations: Vec<RankedHit>,
    from_cache: bool,
}

const STREAM_META_MARKER: &str = "\n\n###META###";

#[utoipa::path(post, path = "/api/query_stream", tag = "query", request_body = QueryRequest, responses((status = 200, description = "Chunked plain-text model response, ending with a citation metadata block")))]
pub async fn query_stream_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Response> {
    if request.query.trim().is_empty() {
        return Err(WhereSpaceError::Validation("query must not be empty".to_string()).into());
    }

    let retrieval = state
        .retriever
        .retrieve(&request.query, request.file_type.as_deref())
        .await?;

    let model = state.model_state.current();
    let chat_stream = state
        .model_client
        .chat_stream(&model, &retrieval.prompt, ChatOptions::default())
        .await?;

    let meta = QueryStreamMeta {
        citations: retrieval.citations,
        from_cache: retrieval.from_cache,
    };

    Ok(stream_response(chat_stream, meta))
}

#[utoipa::path(post, path = "/api/query_direct_stream", tag = "query", request_body = QueryRequest, responses((status = 200, description = "Chunked plain-text model response with no retrieval step")))]
pub async fn query_direct_stream_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Response> {
    if request.query.trim().is_empty() {
        return Err(WhereSpaceError::Validation("query must not be empty".to_string()).into());
    }

    let prompt = crate::retriever::Retriever::direct_prompt(&request.query);
    let model = state.model_state.current();
    let chat_stream = state
        .model_client
        .chat_stream(&model, &prompt, ChatOptions::default())
        .await?;

    let meta = QueryStreamMeta {
        citations: Vec::new(),
        from_cache: false,
    };

    Ok(stream_response(chat_stream, meta))
}

/// Turn a model token stream into a chunked HTTP body: text deltas as they
/// arrive, followed by a `###META###`-prefixed JSON trailer carrying
/// citations. Dropping the returned body (client disconnect) drops
/// `chat_stream`, which drops the underlying HTTP request to the model
/// server and cancels it (P11) -- no explicit cancellation token needed.
fn stream_response(chat_stream: crate::model_client::ChatStream, meta: QueryStreamMeta) -> Response {
    let text_stream = chat_stream.map(|chunk| match chunk {
        Ok(delta) => Ok::<Bytes, std::io::Error>(Bytes::from(delta)),
        Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
    });

    let trailer = match serde_json::to_string(&meta) {
        Ok(json) => format!("{STREAM_META_MARKER}{json}"),
        Err(_) => String::new(),
    };
    let meta_stream = stream::once(async move { Ok::<Bytes, std::io::Error>(Bytes::from(trailer)) });

    let body = Body::from_stream(text_stream.chain(meta_stream));

    Response::builder()
        .header("Content-Type", "text/plain; charset=utf-8")
        .header("Cache-Control", "no-store")
        .body(body)
        .unwrap_or_else(|_| {
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "failed to build streaming response",
            )
                .into_response()
        })
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestDirectoryRequest {
    pub path: String,
    #[serde(default)]
    pub exclude_dirs: Vec<String>,
    #[serde(default)]
    pub max_documents: Option<usize>,
}

#[utoipa::path(post, path = "/api/ingest_directory", tag = "documents", request_body = IngestDirectoryRequest, responses((status = 200, description = "Per-document ingestion outcomes")))]
pub async fn ingest_directory_handler(
    State(state): State<AppState>,
    Json(request): Json<IngestDirectoryRequest>,
) -> ApiResult<Json<crate::ingestion::IngestionReport>> {
    let root = PathBuf::from(&request.path);
    if !root.is_dir() {
        return Err(WhereSpaceError::Validation(format!(
            "{} is not a directory",
            request.path
        ))
        .into());
    }

    let scan_report = scanner::scan(&root, &request.exclude_dirs)?;
    let report = state
        .ingestion
        .ingest(scan_report.files, request.max_documents)
        .await;
    Ok(Json(report))
}
