//! Admin surface: provider status (snapshot and SSE feed), the request-log
//! viewer, manual unfreeze, and health-probe results. Everything here is
//! read-mostly; provider CRUD stays in the config file.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use unigate_core::{ProxyEngine, auth};
use unigate_provider::{MemoryLogSink, StatusUpdate};

#[derive(Clone)]
pub struct AdminState {
    engine: Arc<ProxyEngine>,
    logs: Arc<MemoryLogSink>,
}

pub fn admin_router(engine: Arc<ProxyEngine>, logs: Arc<MemoryLogSink>) -> Router {
    let state = AdminState { engine, logs };
    Router::new()
        .route("/providers/status", get(providers_status))
        .route("/providers/status/stream", get(providers_status_stream))
        .route("/providers/{name}/unfreeze", post(unfreeze_provider))
        .route("/providers/{name}/test-result", post(record_test_result))
        .route("/logs/recent", get(logs_recent))
        .route("/logs/stream", get(logs_stream))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .with_state(state)
}

#[derive(Deserialize)]
struct TokenQuery {
    api_key: Option<String>,
}

/// Same shared token as the gateway; also accepted as a query parameter for
/// EventSource clients that cannot set headers.
async fn require_admin(
    State(state): State<AdminState>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let provided = auth::extract_api_key(req.headers()).or_else(|| {
        req.uri().query().and_then(|raw| {
            serde_urlencoded::from_str::<TokenQuery>(raw)
                .ok()
                .and_then(|query| query.api_key)
        })
    });
    if !state.engine.check_token(provided.as_deref()) {
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "detail": "Invalid or missing API key" })),
        )
            .into_response();
    }
    next.run(req).await
}

async fn providers_status(State(state): State<AdminState>) -> Response {
    axum::Json(serde_json::json!({ "providers": state.engine.provider_status() })).into_response()
}

async fn unfreeze_provider(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    if !state.engine.pool().unfreeze(&name) {
        return not_found("Provider not found");
    }
    state.engine.broadcast_status();
    axum::Json(serde_json::json!({ "status": "success" })).into_response()
}

#[derive(Deserialize)]
struct TestResultBody {
    latency_ms: f64,
}

async fn record_test_result(
    State(state): State<AdminState>,
    Path(name): Path<String>,
    axum::Json(body): axum::Json<TestResultBody>,
) -> Response {
    if !body.latency_ms.is_finite() || body.latency_ms < 0.0 {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(
                serde_json::json!({ "detail": "latency_ms must be a non-negative number" }),
            ),
        )
            .into_response();
    }
    if !state.engine.pool().record_probe(&name, body.latency_ms as u64) {
        return not_found("Provider not found");
    }
    state.engine.broadcast_status();
    axum::Json(serde_json::json!({ "status": "success" })).into_response()
}

#[derive(Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn logs_recent(
    State(state): State<AdminState>,
    Query(query): Query<RecentQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(500).clamp(1, 2000);
    axum::Json(serde_json::json!({ "logs": state.logs.recent(limit) })).into_response()
}

/// SSE feed of request-log records as they are recorded.
async fn logs_stream(State(state): State<AdminState>) -> Response {
    let mut feed = state.logs.subscribe();
    let (tx, rx) = mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        // An opening comment establishes the stream before any record lands.
        if tx.send(Bytes::from_static(b": ok\n\n")).await.is_err() {
            return;
        }
        loop {
            let record = match feed.recv().await {
                Ok(record) => record,
                // A slow consumer skips ahead instead of ending the stream.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            };
            let Some(frame) = sse_frame(&record) else {
                continue;
            };
            if tx.send(frame).await.is_err() {
                return;
            }
        }
    });
    sse_response(rx)
}

/// SSE feed of provider status: one snapshot immediately, then every change.
async fn providers_status_stream(State(state): State<AdminState>) -> Response {
    let mut feed = state.engine.status_hub().subscribe();
    let initial = StatusUpdate::now(state.engine.provider_status());
    let (tx, rx) = mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        if let Some(frame) = sse_frame(&initial) {
            if tx.send(frame).await.is_err() {
                return;
            }
        }
        loop {
            let update = match feed.recv().await {
                Ok(update) => update,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            };
            let Some(frame) = sse_frame(&update) else {
                continue;
            };
            if tx.send(frame).await.is_err() {
                return;
            }
        }
    });
    sse_response(rx)
}

fn sse_frame<T: serde::Serialize>(payload: &T) -> Option<Bytes> {
    let json = serde_json::to_string(payload).ok()?;
    Some(Bytes::from(format!("data: {json}\n\n")))
}

fn sse_response(rx: mpsc::Receiver<Bytes>) -> Response {
    let mut resp =
        Response::new(Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>)));
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    resp.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    resp
}

fn not_found(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({ "detail": message })),
    )
        .into_response()
}
