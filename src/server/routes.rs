//! HTTP route handlers for the catalog API.

use crate::catalog::SearchHit;
use crate::embedding::Embedding;
use crate::error::SnapdexError;
use crate::hash::ContentHash;
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

const DEFAULT_K: usize = 5;

// --- Request/Response types ---

#[derive(Deserialize)]
pub struct IngestRequest {
    /// Image bytes, base64-encoded.
    pub image_base64: String,
    pub filename: Option<String>,
    /// When false, caption the image without storing or indexing anything.
    pub store: Option<bool>,
}

/// Exactly one of `text`, `image_base64`, `hash`, `vector` selects the
/// query embedding.
#[derive(Deserialize)]
pub struct SearchRequest {
    pub text: Option<String>,
    pub image_base64: Option<String>,
    pub hash: Option<String>,
    pub vector: Option<Vec<f32>>,
    pub k: Option<usize>,
    /// For image queries: ingest an unknown image before searching.
    pub store: Option<bool>,
}

#[derive(Serialize)]
pub struct RecordResponse {
    pub hash: ContentHash,
    pub filename: String,
    pub caption: String,
    pub embedded: bool,
    pub indexed: bool,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub records: usize,
    pub embedded: usize,
    pub indexed: usize,
    pub dimension: Option<usize>,
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub total_searches: u64,
    pub total_ingests: u64,
    pub dedup_hits: u64,
    pub provider_failures: u64,
    pub avg_search_latency_us: f64,
    pub p50_search_latency_us: f64,
    pub p95_search_latency_us: f64,
    pub p99_search_latency_us: f64,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: SnapdexError) -> ApiError {
    let status = match &err {
        SnapdexError::Provider(_) => StatusCode::BAD_GATEWAY,
        SnapdexError::NotFound { .. } => StatusCode::NOT_FOUND,
        SnapdexError::InvalidHash { .. } => StatusCode::BAD_REQUEST,
        SnapdexError::DimensionMismatch { .. } => StatusCode::BAD_REQUEST,
        SnapdexError::DuplicateKey { .. } => StatusCode::CONFLICT,
        SnapdexError::IndexSync { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn decode_image(image_base64: &str) -> Result<Vec<u8>, ApiError> {
    base64::engine::general_purpose::STANDARD
        .decode(image_base64)
        .map_err(|e| bad_request(format!("invalid base64 image: {}", e)))
}

// --- Router ---

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/images", post(ingest_image))
        .route("/search", post(search))
        .route("/records/{hash}", get(get_record))
        .route("/rebuild", post(rebuild))
        .route("/snapshot", post(snapshot))
        .route("/health", get(health))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

// --- Handlers ---

async fn ingest_image(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let bytes = decode_image(&req.image_base64)?;
    let filename = req.filename.unwrap_or_default();

    // Caption-only: invoke the provider, mutate nothing.
    if !req.store.unwrap_or(true) {
        let output = state
            .provider
            .embed_image(&bytes, &filename)
            .await
            .map_err(|e| {
                if let Ok(mut metrics) = state.metrics.write() {
                    metrics.record_provider_failure();
                }
                api_error(e)
            })?;
        return Ok((
            StatusCode::OK,
            Json(serde_json::json!({
                "hash": ContentHash::of(&bytes),
                "caption": output.caption,
                "dimension": output.embedding.dimension(),
            })),
        ));
    }

    let report = state
        .catalog
        .ingest(&bytes, &filename, state.provider.as_ref())
        .await
        .map_err(|e| {
            if let Ok(mut metrics) = state.metrics.write() {
                if matches!(e, SnapdexError::Provider(_)) {
                    metrics.record_provider_failure();
                }
            }
            api_error(e)
        })?;

    if let Ok(mut metrics) = state.metrics.write() {
        if report.deduped {
            metrics.record_dedup_hit();
        } else {
            metrics.record_ingest();
        }
    }

    let status = if report.deduped {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(serde_json::json!({
            "hash": report.record.id,
            "filename": report.record.filename,
            "caption": report.record.caption,
            "deduped": report.deduped,
        })),
    ))
}

async fn search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let k = req.k.unwrap_or(DEFAULT_K);
    let start = Instant::now();

    let selectors = [
        req.text.is_some(),
        req.image_base64.is_some(),
        req.hash.is_some(),
        req.vector.is_some(),
    ];
    if selectors.iter().filter(|s| **s).count() != 1 {
        return Err(bad_request(
            "exactly one of text, image_base64, hash, vector is required",
        ));
    }

    let hits = if let Some(text) = req.text {
        state
            .catalog
            .search_by_text(&text, k, state.provider.as_ref())
            .await
    } else if let Some(image_base64) = req.image_base64 {
        let bytes = decode_image(&image_base64)?;
        state
            .catalog
            .search_by_image(
                &bytes,
                "",
                k,
                req.store.unwrap_or(false),
                state.provider.as_ref(),
            )
            .await
    } else if let Some(hash) = req.hash {
        let hash: ContentHash = hash.parse().map_err(api_error)?;
        state.catalog.search_by_hash(&hash, k)
    } else {
        // selector check above guarantees the vector is present
        let vector = req.vector.unwrap();
        state.catalog.search(&Embedding::new(vector), k)
    };
    let hits = hits.map_err(api_error)?;

    if let Ok(mut metrics) = state.metrics.write() {
        metrics.record_search(start.elapsed());
    }

    Ok(Json(hits))
}

async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<RecordResponse>, ApiError> {
    let hash: ContentHash = hash.parse().map_err(api_error)?;
    let record = state.catalog.record(&hash).map_err(api_error)?;
    let indexed = state
        .catalog
        .indexed_position(&hash)
        .map_err(api_error)?
        .is_some();

    Ok(Json(RecordResponse {
        hash: record.id,
        filename: record.filename,
        caption: record.caption,
        embedded: record.embedding.is_some(),
        indexed,
    }))
}

async fn rebuild(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state.catalog.rebuild_from_store().map_err(api_error)?;
    Ok(Json(serde_json::json!({
        "status": "rebuilt",
        "indexed": report.indexed,
        "skipped": report.skipped,
    })))
}

async fn snapshot(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.catalog.save().map_err(api_error)?;
    Ok(Json(serde_json::json!({"status": "saved"})))
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let stats = state.catalog.stats().map_err(api_error)?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        records: stats.records,
        embedded: stats.embedded,
        indexed: stats.indexed,
        dimension: stats.dimension,
    }))
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    let metrics = state.metrics.read().unwrap();

    Json(MetricsResponse {
        total_searches: metrics.total_searches(),
        total_ingests: metrics.total_ingests(),
        dedup_hits: metrics.dedup_hits(),
        provider_failures: metrics.provider_failures(),
        avg_search_latency_us: metrics.avg_search_latency_us(),
        p50_search_latency_us: metrics.percentile_search_latency_us(50.0),
        p95_search_latency_us: metrics.percentile_search_latency_us(95.0),
        p99_search_latency_us: metrics.percentile_search_latency_us(99.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::error::Result;
    use crate::metrics::MetricsCollector;
    use crate::provider::{CaptionOutput, EmbeddingProvider};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::RwLock;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestProvider {
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for TestProvider {
        async fn embed_image(&self, bytes: &[u8], filename: &str) -> Result<CaptionOutput> {
            let mut v = vec![0.0f32; self.dimension];
            for (i, b) in bytes.iter().enumerate() {
                v[i % self.dimension] += *b as f32;
            }
            Ok(CaptionOutput {
                caption: Some(format!("caption of {}", filename)),
                embedding: v.into(),
            })
        }

        async fn embed_text(&self, text: &str) -> Result<Embedding> {
            let mut v = vec![0.0f32; self.dimension];
            for (i, b) in text.bytes().enumerate() {
                v[i % self.dimension] += b as f32;
            }
            Ok(v.into())
        }

        fn name(&self) -> &str {
            "test"
        }
    }

    fn test_router(dir: &TempDir) -> Router {
        let catalog = Arc::new(Catalog::open(dir.path().join("db")).unwrap());
        let state = Arc::new(AppState {
            catalog,
            provider: Arc::new(TestProvider { dimension: 4 }),
            metrics: RwLock::new(MetricsCollector::new()),
        });
        create_router(state)
    }

    fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn image_body(bytes: &[u8], filename: &str) -> serde_json::Value {
        serde_json::json!({
            "image_base64": base64::engine::general_purpose::STANDARD.encode(bytes),
            "filename": filename,
        })
    }

    #[tokio::test]
    async fn test_ingest_then_dedup() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir);

        let response = app
            .clone()
            .oneshot(json_request("/images", image_body(b"pixels", "cat.png")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["deduped"], false);
        assert_eq!(body["caption"], "caption of cat.png");

        let response = app
            .oneshot(json_request("/images", image_body(b"pixels", "copy.png")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["deduped"], true);
        assert_eq!(body["filename"], "cat.png");
    }

    #[tokio::test]
    async fn test_caption_only_stores_nothing() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir);

        let mut body = image_body(b"transient", "t.png");
        body["store"] = serde_json::json!(false);
        let response = app
            .clone()
            .oneshot(json_request("/images", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["caption"], "caption of t.png");

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["records"], 0);
    }

    #[tokio::test]
    async fn test_search_by_vector() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir);

        app.clone()
            .oneshot(json_request("/images", image_body(b"a", "a.png")))
            .await
            .unwrap();
        app.clone()
            .oneshot(json_request("/images", image_body(b"b", "b.png")))
            .await
            .unwrap();

        let response = app
            .oneshot(json_request(
                "/search",
                serde_json::json!({"vector": [97.0, 0.0, 0.0, 0.0], "k": 1}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let hits = body_json(response).await;
        assert_eq!(hits.as_array().unwrap().len(), 1);
        assert_eq!(hits[0]["filename"], "a.png");
    }

    #[tokio::test]
    async fn test_search_requires_one_selector() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir);

        let response = app
            .clone()
            .oneshot(json_request("/search", serde_json::json!({"k": 3})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(json_request(
                "/search",
                serde_json::json!({"text": "x", "vector": [1.0]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_record() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir);

        app.clone()
            .oneshot(json_request("/images", image_body(b"lookup", "l.png")))
            .await
            .unwrap();
        let hash = ContentHash::of(b"lookup");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/records/{}", hash))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["filename"], "l.png");
        assert_eq!(body["indexed"], true);

        let missing = ContentHash::of(b"never ingested");
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/records/{}", missing))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/records/not-a-hash")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rebuild_and_metrics() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir);

        app.clone()
            .oneshot(json_request("/images", image_body(b"one", "1.png")))
            .await
            .unwrap();
        app.clone()
            .oneshot(json_request(
                "/search",
                serde_json::json!({"vector": [1.0, 0.0, 0.0, 0.0]}),
            ))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(json_request("/rebuild", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["indexed"], 1);
        assert_eq!(body["skipped"], 0);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["total_ingests"], 1);
        assert_eq!(body["total_searches"], 1);
    }
}
