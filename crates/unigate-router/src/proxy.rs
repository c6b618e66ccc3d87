//! The forwarded surface: every non-admin path funnels into the dispatch
//! engine; the only route the gateway answers itself is the unified model
//! listing.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use unigate_core::{DispatchOutcome, GatewayError, InboundRequest, ProxyEngine, auth};
use unigate_provider::{Headers, HttpMethod, UpstreamBody, header_get};

#[derive(Clone)]
pub struct GatewayState {
    pub engine: Arc<ProxyEngine>,
}

pub fn gateway_router(engine: Arc<ProxyEngine>) -> Router {
    let state = GatewayState { engine };
    Router::new()
        .route("/v1/models", get(models_list))
        .fallback(universal_proxy)
        .layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state)
}

/// The single shared bearer check. Providers are selected later; this is
/// purely client-facing.
async fn require_token(
    State(state): State<GatewayState>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let provided = auth::extract_api_key(req.headers());
    if !state.engine.check_token(provided.as_deref()) {
        return error_response(GatewayError::unauthorized());
    }
    next.run(req).await
}

/// `GET /v1/models`: deduplicated union of concrete model ids across enabled
/// providers.
async fn models_list(State(state): State<GatewayState>) -> Response {
    let data: Vec<serde_json::Value> = state
        .engine
        .unified_model_ids()
        .into_iter()
        .map(|id| serde_json::json!({ "id": id, "name": id }))
        .collect();
    axum::Json(serde_json::json!({ "data": data })).into_response()
}

async fn universal_proxy(
    State(state): State<GatewayState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(method) = HttpMethod::from_name(method.as_str()) else {
        return (StatusCode::METHOD_NOT_ALLOWED, "unsupported method").into_response();
    };
    let query = uri
        .query()
        .and_then(|raw| serde_urlencoded::from_str::<Vec<(String, String)>>(raw).ok())
        .unwrap_or_default();

    let inbound = InboundRequest {
        method,
        path: uri.path().to_string(),
        headers: headers_to_vec(&headers),
        query,
        body,
    };

    match state.engine.handle(inbound).await {
        Ok(outcome) => to_response(outcome),
        Err(err) => error_response(err),
    }
}

fn to_response(outcome: DispatchOutcome) -> Response {
    let sse_stream = matches!(outcome.response.body, UpstreamBody::Stream(_))
        && header_get(&outcome.response.headers, "content-type")
            .is_some_and(|value| value.to_ascii_lowercase().contains("text/event-stream"));

    let mut builder = Response::builder().status(
        StatusCode::from_u16(outcome.response.status).unwrap_or(StatusCode::BAD_GATEWAY),
    );
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in &outcome.response.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        if sse_stream {
            // Hint common reverse proxies to avoid buffering SSE responses.
            headers
                .entry(header::CACHE_CONTROL)
                .or_insert(HeaderValue::from_static("no-cache"));
            headers
                .entry(HeaderName::from_static("x-accel-buffering"))
                .or_insert(HeaderValue::from_static("no"));
        }
        if let Ok(value) = HeaderValue::from_str(&outcome.trace_id) {
            headers.insert(HeaderName::from_static("x-unigate-request-id"), value);
        }
    }

    let body = match outcome.response.body {
        UpstreamBody::Bytes(bytes) => Body::from(bytes),
        UpstreamBody::Stream(rx) => {
            Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>))
        }
    };

    builder.body(body).unwrap_or_else(|_| {
        (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response()
    })
}

pub(crate) fn error_response(err: GatewayError) -> Response {
    let mut resp = Response::new(Body::from(err.body));
    *resp.status_mut() = err.status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}

pub(crate) fn headers_to_vec(headers: &HeaderMap) -> Headers {
    let mut out: Headers = Vec::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            out.push((name.as_str().to_string(), value.to_string()));
        }
    }
    out
}
