//! HTTP facade (C10): axum router wiring every component into the
//! streaming + document-management API (§4.10)
//!
//! Grounded on the teacher's `api.rs` (`AppState` holding `Arc`-wrapped
//! components, `ApiError` wrapping the crate error type for
//! `IntoResponse`, `CorsLayer` + `TraceLayer`, `utoipa` OpenAPI docs,
//! router assembly in `create_router`).

mod routes;

use crate::config::Config;
use crate::embedding_batcher::EmbeddingBatcher;
use crate::error::WhereSpaceError;
use crate::ingestion::IngestionCoordinator;
use crate::model_catalog::ModelCatalogService;
use crate::model_client::ModelServerClient;
use crate::model_state::ModelState;
use crate::query_cache::QueryCache;
use crate::retriever::Retriever;
use crate::vector_store::VectorStoreAdapter;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Shared application state, cloned cheaply into every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<VectorStoreAdapter>,
    pub model_client: Arc<ModelServerClient>,
    pub retriever: Arc<Retriever>,
    pub ingestion: Arc<IngestionCoordinator>,
    pub model_state: Arc<ModelState>,
    pub model_catalog: Arc<ModelCatalogService>,
    pub query_cache: Arc<QueryCache>,
}

impl AppState {
    pub fn new(config: Config, store: VectorStoreAdapter) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(store);
        let model_client = Arc::new(ModelServerClient::new(&config.model_server));
        let query_cache = Arc::new(QueryCache::new(
            config.retrieval.query_cache_size,
            config.retrieval.query_cache_ttl_sec,
        ));
        let retriever = Arc::new(Retriever::new(
            store.clone(),
            model_client.clone(),
            query_cache.clone(),
            config.retrieval.clone(),
        ));
        let batcher = EmbeddingBatcher::new(model_client.clone());
        let ingestion = Arc::new(IngestionCoordinator::new(
            config.ingestion.clone(),
            config.chunking.clone(),
            batcher,
            store.clone(),
        ));
        let model_state = Arc::new(ModelState::load(&config.model_state));
        let model_catalog = Arc::new(ModelCatalogService::new(model_client.clone()));

        Self {
            config,
            store,
            model_client,
            retriever,
            ingestion,
            model_state,
            model_catalog,
            query_cache,
        }
    }
}

/// Wraps the crate error type so it can be returned directly from axum
/// handlers; maps each category to the HTTP status §7 assigns it
pub struct ApiError(WhereSpaceError);

impl From<WhereSpaceError> for ApiError {
    fn from(err: WhereSpaceError) -> Self {
        ApiError(err)
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WhereSpaceError::Validation(_) => StatusCode::BAD_REQUEST,
            WhereSpaceError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            WhereSpaceError::SchemaMismatch(_) => StatusCode::CONFLICT,
            WhereSpaceError::Cancelled => StatusCode::from_u16(499).unwrap(),
            WhereSpaceError::Embedding(_) | WhereSpaceError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorBody {
            error: self.0.to_string(),
            kind: self.0.category(),
        });

        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::status_handler,
        routes::models_handler,
        routes::set_model_handler,
        routes::list_documents_handler,
        routes::flush_documents_handler,
        routes::query_stream_handler,
        routes::query_direct_stream_handler,
        routes::ingest_directory_handler,
    ),
    components(schemas(
        routes::StatusResponse,
        routes::SetModelRequest,
        routes::SetModelResponse,
        routes::QueryRequest,
        routes::IngestDirectoryRequest,
        ErrorBody,
    )),
    tags(
        (name = "status", description = "Service and model status"),
        (name = "documents", description = "Document ingestion and listing"),
        (name = "query", description = "Retrieval-augmented and direct chat queries"),
    ),
    info(
        title = "WhereSpace API",
        version = "0.1.0",
        description = "Self-hosted retrieval-augmented generation over a local document corpus"
    )
)]
struct ApiDoc;

/// Build the full axum router: every `/api/*` endpoint, Swagger UI at
/// `/docs`, CORS and request tracing
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(routes::status_handler))
        .route("/api/models", get(routes::models_handler))
        .route("/api/set_model", post(routes::set_model_handler))
        .route("/api/list_documents", get(routes::list_documents_handler))
        .route("/api/flush_documents", post(routes::flush_documents_handler))
        .route("/api/query_stream", post(routes::query_stream_handler))
        .route(
            "/api/query_direct_stream",
            post(routes::query_direct_stream_handler),
        )
        .route("/api/ingest_directory", post(routes::ingest_directory_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
