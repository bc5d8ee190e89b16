//! HTTP handlers for admission decisions and statistics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::error::ThrottledError;
use crate::ratelimit::{Decider, Mode, Outcome, MAX_WAIT};

/// Query parameters shared by `/allow` and `/wait`.
///
/// Missing parameters deserialize as empty strings and are rejected by the decider.
#[derive(Debug, Default, Deserialize)]
pub struct DecisionParams {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub rate: String,
    #[serde(default)]
    pub burst: String,
    /// Caller wait limit in seconds, `/wait` only
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Key and outcome of a decision, attached to the response for the access log.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub key: String,
    pub outcome: &'static str,
}

/// Build the router for the given decider.
pub fn router<R: Decider + 'static>(decider: Arc<R>) -> Router {
    Router::new()
        .route("/allow", get(allow::<R>))
        .route("/wait", get(wait::<R>))
        .route("/stats", get(stats::<R>))
        .layer(middleware::from_fn(access_log))
        .with_state(decider)
}

#[instrument(skip(decider, params), fields(key = %params.key))]
async fn allow<R: Decider>(
    State(decider): State<Arc<R>>,
    Query(params): Query<DecisionParams>,
) -> Response {
    decide(decider.as_ref(), params, Mode::Immediate).await
}

#[instrument(skip(decider, params), fields(key = %params.key))]
async fn wait<R: Decider>(
    State(decider): State<Arc<R>>,
    Query(params): Query<DecisionParams>,
) -> Response {
    let timeout = match params.timeout.as_deref().map(parse_timeout).transpose() {
        Ok(timeout) => timeout.unwrap_or(MAX_WAIT).min(MAX_WAIT),
        Err(e) => {
            warn!(error = %e, "Rejecting wait request");
            return with_record(plain(StatusCode::BAD_REQUEST), &params.key, "invalid");
        }
    };
    decide(decider.as_ref(), params, Mode::Blocking { timeout }).await
}

async fn stats<R: Decider>(State(decider): State<Arc<R>>) -> Response {
    Json(decider.stats()).into_response()
}

async fn decide<R: Decider + ?Sized>(
    decider: &R,
    params: DecisionParams,
    mode: Mode,
) -> Response {
    match decider
        .decide(&params.key, &params.rate, &params.burst, mode)
        .await
    {
        Ok(outcome) => with_record(plain(status_for(outcome)), &params.key, outcome.as_str()),
        Err(ThrottledError::InvalidRequest(reason)) => {
            warn!(reason = %reason, "Rejecting malformed request");
            with_record(plain(StatusCode::BAD_REQUEST), &params.key, "invalid")
        }
        Err(e) => {
            warn!(error = %e, "Admission decision failed");
            with_record(plain(StatusCode::INTERNAL_SERVER_ERROR), &params.key, "error")
        }
    }
}

fn parse_timeout(raw: &str) -> Result<Duration, ThrottledError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| ThrottledError::InvalidRequest(format!("invalid timeout {:?}", raw)))
}

/// Map an outcome to the status code the service responds with.
pub fn status_for(outcome: Outcome) -> StatusCode {
    match outcome {
        Outcome::Created | Outcome::Renewed => StatusCode::CREATED,
        Outcome::Admitted => StatusCode::OK,
        Outcome::Denied => StatusCode::TOO_MANY_REQUESTS,
    }
}

/// A plain-text response whose body is the status reason phrase.
fn plain(status: StatusCode) -> Response {
    let body = format!("{}\n", status.canonical_reason().unwrap_or_default());
    (status, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

fn with_record(mut response: Response, key: &str, outcome: &'static str) -> Response {
    response.extensions_mut().insert(AccessRecord {
        key: key.to_string(),
        outcome,
    });
    response
}

/// Emit one access log event per request.
async fn access_log(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let response = next.run(request).await;

    let record = response.extensions().get::<AccessRecord>();
    info!(
        target: "throttled::access",
        method = %method,
        uri = %uri,
        host = %host,
        status = response.status().as_u16(),
        key = record.map(|r| r.key.as_str()).unwrap_or_default(),
        outcome = record.map(|r| r.outcome).unwrap_or_default(),
        apptime = %format!("{:.6}", start.elapsed().as_secs_f64()),
        "request"
    );

    response
}
