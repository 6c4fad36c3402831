mod response;
mod validate;

pub use self::response::{unhandled, ApiError, DumpResponse, HealthResponse};

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use joblib::JobCoordinator;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};

/// Shared handler state. Cloning is cheap: the coordinator carries no per-job state.
#[derive(Clone, Debug)]
pub struct DumpService {
    coordinator: JobCoordinator,
    max_code_bytes: usize,
    started: Instant,
}

impl DumpService {
    pub fn new(coordinator: JobCoordinator, max_code_bytes: usize) -> Self {
        Self {
            coordinator,
            max_code_bytes,
            started: Instant::now(),
        }
    }
}

pub async fn health(State(service): State<DumpService>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        uptime: service.started.elapsed().as_secs_f64(),
    })
}

/// `POST /api/dump`: validate, run one job, map its report onto the response contract.
pub async fn dump(
    State(service): State<DumpService>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<DumpResponse>, ApiError> {
    let Json(body) = body.map_err(|rejection| reject_body(rejection, service.max_code_bytes))?;
    let request = validate::parse_request(body, service.max_code_bytes)?;

    let report = service
        .coordinator
        .run_job(&request.code, &request.options)
        .await?;

    let execution = report.execution;
    if report.dumped_code.is_empty() {
        warn!(job_id = %report.id, outcome = %report.outcome, "dumper produced no output");
        let details = non_empty(execution.stderr).or(execution.error);
        return Err(ApiError::internal("Dumper produced no output").with_details(details));
    }

    Ok(Json(DumpResponse {
        success: true,
        dumped_code: report.dumped_code,
        stats: report.stats,
        console_output: execution.stdout,
        warnings: non_empty(execution.stderr),
    }))
}

fn reject_body(rejection: JsonRejection, max_code_bytes: usize) -> ApiError {
    debug!(%rejection, "rejected dump body");
    match rejection {
        // no JSON content type means no `code` field reached us
        JsonRejection::MissingJsonContentType(_) => ApiError::bad_request(validate::NO_CODE),
        rejection if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            validate::too_large(max_code_bytes)
        }
        _ => ApiError::bad_request("Invalid JSON body"),
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
