//! The dispatch engine: candidate iteration, request rewriting, failover, and
//! hot configuration swap. One `ProxyEngine` owns the provider pool, the
//! upstream client, and the log/status boundaries; handlers borrow it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use unigate_common::new_trace_id;
use unigate_provider::matcher::is_glob_pattern;
use unigate_provider::{
    AppConfig, ConfigSource, Headers, HttpMethod, ProviderPool, ProviderStatus, QueryItems,
    RequestLogRecord, SharedLogSink, StatusHub, StatusUpdate, UpstreamClient, UpstreamRequest,
    UpstreamResponse, header_get,
};

use crate::error::GatewayError;
use crate::intent::wants_stream;
use crate::sanitize::{outbound_headers, response_headers};
use crate::url::join_upstream_url;

pub const CONFIG_WATCH_INTERVAL: Duration = Duration::from_secs(2);

const STATUS_FEED_BUFFER: usize = 32;

/// Everything the engine needs from one inbound request. The body arrives
/// fully read; streaming only ever applies to responses.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: Headers,
    pub query: QueryItems,
    pub body: Bytes,
}

#[derive(Debug)]
pub struct DispatchOutcome {
    pub trace_id: String,
    pub response: UpstreamResponse,
}

pub struct ProxyEngine {
    config: ArcSwap<AppConfig>,
    pool: Arc<ProviderPool>,
    client: Arc<dyn UpstreamClient>,
    listing_paths: ArcSwap<HashSet<String>>,
    status: StatusHub,
    logs: SharedLogSink,
}

impl ProxyEngine {
    pub fn new(config: AppConfig, client: Arc<dyn UpstreamClient>, logs: SharedLogSink) -> Self {
        let pool = Arc::new(ProviderPool::new(&config));
        let listing_paths = model_listing_paths(&config);
        Self {
            config: ArcSwap::from_pointee(config),
            pool,
            client,
            listing_paths: ArcSwap::from_pointee(listing_paths),
            status: StatusHub::new(STATUS_FEED_BUFFER),
            logs,
        }
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config.load_full()
    }

    pub fn pool(&self) -> Arc<ProviderPool> {
        self.pool.clone()
    }

    pub fn status_hub(&self) -> StatusHub {
        self.status.clone()
    }

    /// Compares a client-supplied credential against the shared gateway token.
    pub fn check_token(&self, provided: Option<&str>) -> bool {
        provided == Some(self.config.load().api_key.as_str())
    }

    /// Paths that may be dispatched without a model id, i.e. the providers'
    /// declared model-listing endpoints.
    pub fn is_model_listing_path(&self, path: &str) -> bool {
        let paths = self.listing_paths.load();
        if path.starts_with('/') {
            paths.contains(path)
        } else {
            paths.contains(&format!("/{path}"))
        }
    }

    /// Deduplicated union of concrete (non-glob) model ids across enabled
    /// providers, sorted.
    pub fn unified_model_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for (_, rules) in self.pool.list_models() {
            for rule in rules {
                let id = rule.exposed_id();
                if is_glob_pattern(id) {
                    continue;
                }
                if seen.insert(id.to_string()) {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort_unstable();
        ids
    }

    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.pool.status_snapshot()
    }

    pub fn broadcast_status(&self) {
        self.status
            .broadcast(StatusUpdate::now(self.pool.status_snapshot()));
    }

    /// Kicks off model hydration for providers configured without a model
    /// list. Called at startup and after every reload.
    pub fn spawn_hydration(&self) {
        let pool = self.pool.clone();
        let client = self.client.clone();
        let timeout = Duration::from_secs_f64(pool.preferences().model_timeout);
        tokio::spawn(async move {
            pool.hydrate_missing(client.as_ref(), timeout).await;
        });
    }

    /// Atomically swaps in a validated configuration. In-flight requests keep
    /// the pool snapshot they started with and finish undisturbed.
    pub fn apply_config(&self, config: AppConfig) {
        info!(
            providers = config.providers.len(),
            "applying updated configuration"
        );
        self.listing_paths
            .store(Arc::new(model_listing_paths(&config)));
        self.pool.rebuild(&config);
        self.config.store(Arc::new(config));
        self.spawn_hydration();
        self.broadcast_status();
    }

    /// Routes one inbound request: picks the candidate tier, rewrites auth
    /// and model, and fails over on retryable errors until a provider
    /// answers or the tier is exhausted.
    pub async fn handle(&self, inbound: InboundRequest) -> Result<DispatchOutcome, GatewayError> {
        let trace_id = new_trace_id();
        let started = Instant::now();

        let parsed_body = parse_json_body(&inbound.headers, &inbound.body);
        let model = extract_model(parsed_body.as_ref(), &inbound.query);
        if model.is_none() && !self.is_model_listing_path(&inbound.path) {
            let err = GatewayError::missing_model();
            self.record(&trace_id, &inbound, None, &model, err.status.as_u16(), started, false, Vec::new());
            return Err(err);
        }

        let candidates = match &model {
            Some(model) => self.pool.iter_candidates(model),
            None => self.pool.candidates_for_any(),
        };
        info!(
            event = "dispatch_candidates",
            trace_id = %trace_id,
            model = model.as_deref().unwrap_or("<any>"),
            count = candidates.len()
        );
        if candidates.is_empty() {
            let err = GatewayError::no_candidates(model.as_deref());
            self.record(&trace_id, &inbound, None, &model, err.status.as_u16(), started, false, Vec::new());
            return Err(err);
        }

        let timeout = Duration::from_secs_f64(self.pool.preferences().model_timeout);
        let want_stream = wants_stream(&inbound.headers, &inbound.query, parsed_body.as_ref());
        let mut failures: Vec<String> = Vec::new();

        for state in candidates {
            let provider = state.config().clone();
            let provider_model = match &model {
                // The candidate matched at enumeration; a pattern swap since
                // then just forwards the id unchanged.
                Some(model) => state.provider_model(model).unwrap_or_else(|| model.clone()),
                None => String::new(),
            };
            let rewrite = model.as_deref().is_some_and(|m| m != provider_model);
            let body = if rewrite {
                body_with_model_override(&inbound.body, parsed_body.as_ref(), &provider_model)
            } else {
                inbound.body.clone()
            };
            let query = if rewrite {
                query_with_model_override(&inbound.query, &provider_model)
            } else {
                inbound.query.clone()
            };

            let url = join_upstream_url(provider.normalized_base_url(), &inbound.path);
            let headers = outbound_headers(&inbound.headers, &provider.api_key);
            info!(
                event = "upstream_attempt",
                trace_id = %trace_id,
                provider = %provider.name,
                model = model.as_deref().unwrap_or("<any>"),
                mapped = rewrite.then_some(provider_model.as_str()),
                url = %url,
                is_stream = want_stream
            );

            let request = UpstreamRequest {
                method: inbound.method,
                url,
                headers,
                query,
                body: (!body.is_empty()).then_some(body),
                timeout,
                want_stream,
            };

            match self.client.send(request).await {
                Err(err) => {
                    let reason = err.to_string();
                    warn!(
                        event = "upstream_failed",
                        trace_id = %trace_id,
                        provider = %provider.name,
                        reason = %reason,
                        "trying next provider"
                    );
                    failures.push(format!("{}: {reason}", provider.name));
                    self.pool.mark_failure(&state, reason);
                    self.broadcast_status();
                }
                Ok(response) if response.status >= 500 || response.status == 429 => {
                    let reason = format!("HTTP {}", response.status);
                    warn!(
                        event = "upstream_failed",
                        trace_id = %trace_id,
                        provider = %provider.name,
                        reason = %reason,
                        "trying next provider"
                    );
                    failures.push(format!("{}: {reason}", provider.name));
                    self.pool.mark_failure(&state, reason);
                    self.broadcast_status();
                }
                Ok(response) if response.status >= 400 => {
                    // Upstream blamed the request, not itself: hand the
                    // response back verbatim and stop. No cooldown.
                    warn!(
                        event = "upstream_client_error",
                        trace_id = %trace_id,
                        provider = %provider.name,
                        status = response.status
                    );
                    return Ok(self.finish(
                        trace_id,
                        &inbound,
                        &model,
                        &provider.name,
                        response,
                        started,
                        failures,
                    ));
                }
                Ok(response) => {
                    self.pool.mark_success(&state);
                    return Ok(self.finish(
                        trace_id,
                        &inbound,
                        &model,
                        &provider.name,
                        response,
                        started,
                        failures,
                    ));
                }
            }
        }

        let err = GatewayError::all_attempts_failed(&failures);
        self.record(&trace_id, &inbound, None, &model, err.status.as_u16(), started, false, failures);
        Err(err)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        trace_id: String,
        inbound: &InboundRequest,
        model: &Option<String>,
        provider: &str,
        mut response: UpstreamResponse,
        started: Instant,
        failover: Vec<String>,
    ) -> DispatchOutcome {
        response.headers = response_headers(&response.headers);
        let is_stream = response.is_streaming();
        info!(
            event = "dispatch_complete",
            trace_id = %trace_id,
            provider = %provider,
            status = response.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            is_stream
        );
        self.record(
            &trace_id,
            inbound,
            Some(provider),
            model,
            response.status,
            started,
            is_stream,
            failover,
        );
        DispatchOutcome { trace_id, response }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        trace_id: &str,
        inbound: &InboundRequest,
        provider: Option<&str>,
        model: &Option<String>,
        status: u16,
        started: Instant,
        is_stream: bool,
        failover: Vec<String>,
    ) {
        self.logs.record(RequestLogRecord {
            trace_id: trace_id.to_string(),
            at: OffsetDateTime::now_utc(),
            method: inbound.method.to_string(),
            path: inbound.path.clone(),
            model: model.clone(),
            provider: provider.map(str::to_string),
            status,
            elapsed_ms: started.elapsed().as_millis() as u64,
            is_stream,
            failover,
        });
    }
}

/// Polls the configuration source and swaps validated updates in. A broken
/// edit is logged and retried; the running configuration stays untouched.
pub fn spawn_config_watcher(
    engine: Arc<ProxyEngine>,
    source: Arc<dyn ConfigSource>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CONFIG_WATCH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !source.poll_changed() {
                continue;
            }
            match source.load() {
                Ok(config) => {
                    engine.apply_config(config);
                    source.acknowledge();
                }
                Err(err) => {
                    error!(error = %err, "configuration reload failed; keeping current configuration");
                }
            }
        }
    })
}

fn model_listing_paths(config: &AppConfig) -> HashSet<String> {
    config
        .providers
        .iter()
        .map(|provider| provider.normalized_models_endpoint())
        .collect()
}

/// Parses the body as JSON when the content type says so; only objects are
/// interesting (model extraction and stream detection both key off fields).
fn parse_json_body(headers: &Headers, body: &Bytes) -> Option<serde_json::Value> {
    let content_type = header_get(headers, "content-type")?;
    if !content_type.to_ascii_lowercase().contains("application/json") || body.is_empty() {
        return None;
    }
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .filter(|value| value.is_object())
}

fn extract_model(parsed_body: Option<&serde_json::Value>, query: &QueryItems) -> Option<String> {
    if let Some(model) = parsed_body
        .and_then(|value| value.get("model"))
        .and_then(|value| value.as_str())
    {
        return Some(model.to_string());
    }
    query
        .iter()
        .find(|(key, _)| key == "model")
        .map(|(_, value)| value.clone())
}

/// Re-serializes the body with the provider's model id patched in. Bodies
/// without a `model` field pass through untouched.
fn body_with_model_override(
    body: &Bytes,
    parsed_body: Option<&serde_json::Value>,
    provider_model: &str,
) -> Bytes {
    let Some(serde_json::Value::Object(fields)) = parsed_body else {
        return body.clone();
    };
    if !fields.contains_key("model") {
        return body.clone();
    }
    let mut patched = fields.clone();
    patched.insert(
        "model".to_string(),
        serde_json::Value::String(provider_model.to_string()),
    );
    match serde_json::to_vec(&serde_json::Value::Object(patched)) {
        Ok(bytes) => Bytes::from(bytes),
        Err(_) => body.clone(),
    }
}

fn query_with_model_override(query: &QueryItems, provider_model: &str) -> QueryItems {
    query
        .iter()
        .map(|(key, value)| {
            if key.eq_ignore_ascii_case("model") {
                (key.clone(), provider_model.to_string())
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn model_comes_from_body_before_query() {
        let body = json!({"model": "gpt-4", "messages": []});
        let query = vec![("model".to_string(), "other".to_string())];
        assert_eq!(
            extract_model(Some(&body), &query),
            Some("gpt-4".to_string())
        );
        assert_eq!(extract_model(None, &query), Some("other".to_string()));
        assert_eq!(extract_model(None, &Vec::new()), None);
    }

    #[test]
    fn json_body_requires_json_content_type() {
        let body = Bytes::from_static(br#"{"model":"gpt-4"}"#);
        let json_headers: Headers =
            vec![("content-type".into(), "application/json; charset=utf-8".into())];
        assert!(parse_json_body(&json_headers, &body).is_some());

        let text_headers: Headers = vec![("content-type".into(), "text/plain".into())];
        assert!(parse_json_body(&text_headers, &body).is_none());
        assert!(parse_json_body(&json_headers, &Bytes::new()).is_none());
    }

    #[test]
    fn body_override_patches_only_model() {
        let body = Bytes::from_static(br#"{"model":"gpt-4o","messages":[{"role":"user"}]}"#);
        let parsed = parse_json_body(
            &vec![("content-type".into(), "application/json".into())],
            &body,
        );
        let patched = body_with_model_override(&body, parsed.as_ref(), "gpt-4o-2024-08-06");
        let value: serde_json::Value = serde_json::from_slice(&patched).unwrap();
        assert_eq!(value["model"], "gpt-4o-2024-08-06");
        assert_eq!(value["messages"], json!([{"role": "user"}]));

        // No model field: bytes pass through untouched.
        let plain = Bytes::from_static(br#"{"messages":[]}"#);
        let parsed: serde_json::Value = serde_json::from_slice(&plain).unwrap();
        assert_eq!(
            body_with_model_override(&plain, Some(&parsed), "x"),
            plain
        );
    }

    #[test]
    fn query_override_replaces_model_items() {
        let query = vec![
            ("model".to_string(), "gpt-4o".to_string()),
            ("key".to_string(), "abc".to_string()),
        ];
        let rewritten = query_with_model_override(&query, "gpt-4o-2024-08-06");
        assert_eq!(rewritten[0].1, "gpt-4o-2024-08-06");
        assert_eq!(rewritten[1].1, "abc");
    }
}
