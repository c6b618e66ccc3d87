//! Streaming decisions on both sides of one relay.
//!
//! `wants_stream` runs before the upstream send so the read timeout can be
//! lifted; `should_stream_response` runs on the upstream's answer to pick
//! between buffering and chunk relay.

use unigate_provider::{Headers, QueryItems, header_get};

use unigate_common::parse_bool_literal;

const STREAM_CONTENT_TYPES: &[&str] = &[
    "text/event-stream",
    "application/event-stream",
    "application/x-ndjson",
];

/// Whether the inbound request intends a streaming response. First match
/// wins: `Accept` header, `stream`/`streaming` query parameter, then a
/// top-level `stream`/`streaming` body field.
pub fn wants_stream(
    headers: &Headers,
    query: &QueryItems,
    parsed_body: Option<&serde_json::Value>,
) -> bool {
    if accept_expects_stream(header_get(headers, "accept")) {
        return true;
    }

    for (key, value) in query {
        if key.eq_ignore_ascii_case("stream") || key.eq_ignore_ascii_case("streaming") {
            if let Some(flag) = parse_bool_literal(value) {
                return flag;
            }
        }
    }

    let Some(body) = parsed_body.and_then(|value| value.as_object()) else {
        return false;
    };
    let flag = body.get("stream").or_else(|| body.get("streaming"));
    match flag {
        Some(serde_json::Value::Bool(value)) => *value,
        Some(serde_json::Value::Number(value)) => value.as_f64().is_some_and(|n| n != 0.0),
        Some(serde_json::Value::String(value)) => parse_bool_literal(value).unwrap_or(false),
        _ => false,
    }
}

pub fn accept_expects_stream(accept: Option<&str>) -> bool {
    accept.is_some_and(|value| {
        let value = value.to_ascii_lowercase();
        value.contains("text/event-stream") || value.contains("application/event-stream")
    })
}

/// Whether a succeeded upstream response should be relayed chunk by chunk.
/// Stream-shaped content types always are; otherwise only an explicit accept
/// intent combined with chunked (or unsized) framing qualifies.
pub fn should_stream_response(response_headers: &Headers, inbound_accept: Option<&str>) -> bool {
    let content_type = header_get(response_headers, "content-type")
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if STREAM_CONTENT_TYPES
        .iter()
        .any(|marker| content_type.starts_with(marker))
    {
        return true;
    }

    if !accept_expects_stream(inbound_accept) {
        return false;
    }
    let chunked = header_get(response_headers, "transfer-encoding")
        .is_some_and(|value| value.to_ascii_lowercase().contains("chunked"));
    chunked || header_get(response_headers, "content-length").is_none()
}
