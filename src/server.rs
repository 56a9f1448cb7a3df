//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/query` | Run the triage pipeline: `{input, patient}` |
//! | `POST` | `/labs` | Screen lab values: `{values: {name: number}}` |
//! | `GET`  | `/records?limit=N` | Most recent outcome records |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid input: user input cannot be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `processing_error` (500), `internal` (500).
//! Bodies that are not JSON or do not match the request shape are `bad_request`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end can
//! call the API directly.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::error::CarelineError;
use crate::labs::{analyze_labs, LabFinding};
use crate::models::{OutcomeRecord, QueryOutcome};
use crate::pipeline::QueryOrchestrator;

const DEFAULT_RECORDS_LIMIT: i64 = 20;
const MAX_RECORDS_LIMIT: i64 = 500;

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<QueryOrchestrator>,
}

/// Build the pipeline from `config` and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let orchestrator = QueryOrchestrator::from_config(config).await?;
    let app = router(Arc::new(orchestrator));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "HTTP server listening");
    println!("Careline API listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Routes over an already-built orchestrator.
pub fn router(orchestrator: Arc<QueryOrchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .route("/labs", post(handle_labs))
        .route("/records", get(handle_records))
        .layer(cors)
        .with_state(AppState { orchestrator })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<CarelineError> for AppError {
    fn from(err: CarelineError) -> Self {
        match err {
            CarelineError::InvalidInput(_) => bad_request(err.to_string()),
            CarelineError::Processing { .. } => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "processing_error",
                message: err.to_string(),
            },
            other => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal",
                message: other.to_string(),
            },
        }
    }
}

// ============ GET /health ============

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

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    input: String,
    #[serde(default = "default_patient")]
    patient: String,
}

fn default_patient() -> String {
    "adult".to_string()
}

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryOutcome>, AppError> {
    let Json(req) = payload?;
    let outcome = state
        .orchestrator
        .process_query(&req.input, &req.patient)
        .await?;
    Ok(Json(outcome))
}

// ============ POST /labs ============

#[derive(Deserialize)]
struct LabsRequest {
    #[serde(deserialize_with = "ordered_values")]
    values: Vec<(String, f64)>,
}

#[derive(Serialize)]
struct LabsResponse {
    findings: Vec<LabsFindingBody>,
}

#[derive(Serialize)]
struct LabsFindingBody {
    #[serde(flatten)]
    finding: LabFinding,
    summary: String,
}

/// Read a JSON object as `(key, number)` pairs in document order.
fn ordered_values<'de, D>(deserializer: D) -> Result<Vec<(String, f64)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PairsVisitor;

    impl<'de> Visitor<'de> for PairsVisitor {
        type Value = Vec<(String, f64)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an object mapping lab test names to numbers")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, f64>()? {
                pairs.push((key, value));
            }
            Ok(pairs)
        }
    }

    deserializer.deserialize_map(PairsVisitor)
}

async fn handle_labs(
    payload: Result<Json<LabsRequest>, JsonRejection>,
) -> Result<Json<LabsResponse>, AppError> {
    let Json(req) = payload?;
    if req.values.is_empty() {
        return Err(bad_request("values must not be empty"));
    }
    let findings = analyze_labs(&req.values)
        .into_iter()
        .map(|finding| LabsFindingBody {
            summary: finding.to_string(),
            finding,
        })
        .collect();
    Ok(Json(LabsResponse { findings }))
}

// ============ GET /records ============

#[derive(Deserialize)]
struct RecordsParams {
    limit: Option<i64>,
}

#[derive(Serialize)]
struct RecordsResponse {
    records: Vec<OutcomeRecord>,
}

async fn handle_records(
    State(state): State<AppState>,
    Query(params): Query<RecordsParams>,
) -> Result<Json<RecordsResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_RECORDS_LIMIT);
    if !(1..=MAX_RECORDS_LIMIT).contains(&limit) {
        return Err(bad_request(format!(
            "limit must be between 1 and {}",
            MAX_RECORDS_LIMIT
        )));
    }
    let records = state.orchestrator.records().recent(limit).await?;
    Ok(Json(RecordsResponse { records }))
}
