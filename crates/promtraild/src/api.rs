//! HTTP surface of the daemon.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/queries` | Capture an observed query |
//! | GET | `/api/v1/fingerprint` | Fingerprint `?query=` (optionally `&ignore_ranges=true`) |
//! | GET | `/healthz` | Liveness |
//! | GET | `/metrics` | Prometheus exposition |

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use promtrail_fingerprint::{fingerprint, label_matchers, parse};
use promtrail_ingest::IngestHandle;
use promtrail_metrics::{Metrics, render_prometheus};
use promtrail_state::{QueryRecord, QueryType};

#[derive(Clone)]
pub struct AppState {
    pub ingest: IngestHandle,
    pub metrics: Arc<Metrics>,
    /// Fingerprint captured queries with matrix ranges zeroed.
    pub ignore_ranges: bool,
}

pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/queries", post(capture_query))
        .route("/fingerprint", get(fingerprint_query));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(healthz))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// A query observed by a proxy or log shipper.
#[derive(Debug, Deserialize)]
pub struct CapturedQuery {
    pub query: String,
    /// Observation time; defaults to receipt time.
    #[serde(default)]
    pub ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default = "default_status")]
    pub status_code: u16,
    #[serde(default)]
    pub body_size: u64,
    #[serde(default)]
    pub query_type: QueryType,
    #[serde(default)]
    pub step_secs: f64,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_queryable_samples: u64,
    #[serde(default)]
    pub peak_samples: u64,
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct FingerprintBody {
    pub fingerprint: String,
    pub canonical: String,
}

/// POST /api/v1/queries
///
/// Fingerprints the query and hands it to the ingester. Unparseable
/// queries are still captured, with an empty fingerprint.
async fn capture_query(
    State(state): State<AppState>,
    Json(captured): Json<CapturedQuery>,
) -> axum::response::Response {
    if captured.query.trim().is_empty() {
        return error_response("query must not be empty", StatusCode::BAD_REQUEST);
    }

    let fp = fingerprint(&captured.query, state.ignore_ranges);
    let record = QueryRecord {
        ts: captured.ts.unwrap_or_else(Utc::now),
        label_matchers: label_matchers(&captured.query),
        fingerprint: fp.hash.clone(),
        query: captured.query,
        time_param: captured.time,
        duration_ms: captured.duration_ms,
        status_code: captured.status_code,
        body_size: captured.body_size,
        query_type: captured.query_type,
        step_secs: captured.step_secs,
        start: captured.start,
        end: captured.end,
        total_queryable_samples: captured.total_queryable_samples,
        peak_samples: captured.peak_samples,
    };
    state.ingest.enqueue(record);

    (
        StatusCode::ACCEPTED,
        ApiResponse::ok(FingerprintBody {
            fingerprint: fp.hash,
            canonical: fp.canonical,
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct FingerprintParams {
    pub query: String,
    #[serde(default)]
    pub ignore_ranges: bool,
}

/// GET /api/v1/fingerprint
async fn fingerprint_query(Query(params): Query<FingerprintParams>) -> axum::response::Response {
    if let Err(e) = parse(&params.query) {
        return error_response(&e.to_string(), StatusCode::UNPROCESSABLE_ENTITY);
    }
    let fp = fingerprint(&params.query, params.ignore_ranges);
    ApiResponse::ok(FingerprintBody {
        fingerprint: fp.hash,
        canonical: fp.canonical,
    })
    .into_response()
}

/// GET /healthz
async fn healthz() -> &'static str {
    "ok"
}

/// GET /metrics
async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = render_prometheus(&state.metrics);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
