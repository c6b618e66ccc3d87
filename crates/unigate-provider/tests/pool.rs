use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;

use unigate_provider::{
    AppConfig, HttpMethod, ModelRule, PreferencesConfig, ProviderConfig, ProviderPool,
    UpstreamBody, UpstreamClient, UpstreamError, UpstreamRequest, UpstreamResponse,
};

fn provider(name: &str, priority: i32, models: Option<Vec<&str>>) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        base_url: format!("https://{name}.example/v1"),
        api_key: format!("key-{name}"),
        priority,
        models: models.map(|ids| {
            ids.into_iter()
                .map(|id| ModelRule::Pattern(id.to_string()))
                .collect()
        }),
        models_endpoint: "/v1/models".to_string(),
        enabled: true,
        cooldown_period: None,
    }
}

fn config(providers: Vec<ProviderConfig>, cooldown_period: f64) -> AppConfig {
    AppConfig {
        api_key: "secret".to_string(),
        preferences: PreferencesConfig {
            model_timeout: 5.0,
            cooldown_period,
            proxy: None,
        },
        providers,
    }
}

fn names(candidates: &[std::sync::Arc<unigate_provider::ProviderState>]) -> Vec<&str> {
    candidates.iter().map(|state| state.name()).collect()
}

#[tokio::test]
async fn lower_priority_is_shadowed_by_higher() {
    let pool = ProviderPool::new(&config(
        vec![
            provider("a", 10, Some(vec!["gpt-4"])),
            provider("b", 0, Some(vec!["gpt-4"])),
        ],
        0.2,
    ));

    let candidates = pool.iter_candidates("gpt-4");
    assert_eq!(names(&candidates), ["a"]);

    // Once the top provider cools down, the next tier becomes visible.
    pool.mark_failure(&candidates[0], "HTTP 500");
    assert_eq!(names(&pool.iter_candidates("gpt-4")), ["b"]);
}

#[tokio::test]
async fn tie_tier_contains_every_peer() {
    let pool = ProviderPool::new(&config(
        vec![
            provider("a", 5, Some(vec!["gpt-4"])),
            provider("b", 5, Some(vec!["gpt-4"])),
            provider("c", 1, Some(vec!["gpt-4"])),
        ],
        0.2,
    ));

    let candidates = pool.iter_candidates("gpt-4");
    let mut seen = names(&candidates);
    seen.sort_unstable();
    assert_eq!(seen, ["a", "b"]);
}

#[tokio::test]
async fn model_filter_excludes_non_matching_providers() {
    let pool = ProviderPool::new(&config(
        vec![
            provider("openai", 0, Some(vec!["gpt-4*"])),
            provider("anthropic", 0, Some(vec!["claude-*"])),
        ],
        0.2,
    ));

    assert_eq!(names(&pool.iter_candidates("gpt-4o")), ["openai"]);
    assert_eq!(names(&pool.iter_candidates("claude-3-opus")), ["anthropic"]);
    assert!(pool.iter_candidates("gemini-pro").is_empty());

    let candidates = pool.candidates_for_any();
    let mut any = names(&candidates);
    any.sort_unstable();
    assert_eq!(any, ["anthropic", "openai"]);
}

#[tokio::test]
async fn cooldown_excludes_then_recovers() {
    let pool = ProviderPool::new(&config(vec![provider("a", 0, Some(vec!["gpt-4"]))], 0.05));
    let state = pool.get("a").unwrap();

    pool.mark_failure(&state, "connection error: refused");
    assert!(pool.iter_candidates("gpt-4").is_empty());
    assert_eq!(
        state.last_error().as_deref(),
        Some("connection error: refused")
    );

    tokio::time::sleep(Duration::from_millis(80)).await;
    // Expiry needs no event; the next enumeration simply sees it healthy.
    assert_eq!(names(&pool.iter_candidates("gpt-4")), ["a"]);
}

#[tokio::test]
async fn success_clears_cooldown_immediately() {
    let pool = ProviderPool::new(&config(vec![provider("a", 0, Some(vec!["gpt-4"]))], 30.0));
    let state = pool.get("a").unwrap();

    pool.mark_failure(&state, "HTTP 503");
    assert!(pool.iter_candidates("gpt-4").is_empty());

    pool.mark_success(&state);
    assert_eq!(names(&pool.iter_candidates("gpt-4")), ["a"]);
    assert_eq!(state.last_error(), None);
}

#[tokio::test]
async fn zero_cooldown_records_reason_without_freezing() {
    let pool = ProviderPool::new(&config(vec![provider("a", 0, Some(vec!["gpt-4"]))], 0.0));
    let state = pool.get("a").unwrap();

    pool.mark_failure(&state, "HTTP 429");
    assert_eq!(names(&pool.iter_candidates("gpt-4")), ["a"]);
    assert_eq!(state.last_error().as_deref(), Some("HTTP 429"));
}

#[tokio::test]
async fn per_provider_cooldown_override_wins() {
    let mut quick = provider("quick", 0, Some(vec!["gpt-4"]));
    quick.cooldown_period = Some(0.05);
    let pool = ProviderPool::new(&config(vec![quick], 60.0));
    let state = pool.get("quick").unwrap();

    pool.mark_failure(&state, "HTTP 500");
    assert!(pool.iter_candidates("gpt-4").is_empty());

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(names(&pool.iter_candidates("gpt-4")), ["quick"]);
}

#[tokio::test]
async fn manual_unfreeze_restores_eligibility() {
    let pool = ProviderPool::new(&config(vec![provider("a", 0, Some(vec!["gpt-4"]))], 60.0));
    let state = pool.get("a").unwrap();

    pool.mark_failure(&state, "HTTP 502");
    assert!(pool.iter_candidates("gpt-4").is_empty());

    assert!(pool.unfreeze("a"));
    assert_eq!(names(&pool.iter_candidates("gpt-4")), ["a"]);
    assert!(!pool.unfreeze("missing"));
}

#[tokio::test]
async fn rebuild_discards_runtime_state() {
    let cfg = config(vec![provider("a", 0, Some(vec!["gpt-4"]))], 60.0);
    let pool = ProviderPool::new(&cfg);
    pool.mark_failure(&pool.get("a").unwrap(), "HTTP 500");
    assert!(pool.iter_candidates("gpt-4").is_empty());

    pool.rebuild(&cfg);
    assert_eq!(names(&pool.iter_candidates("gpt-4")), ["a"]);
}

#[tokio::test]
async fn unhydrated_provider_serves_nothing_but_answers_any() {
    let pool = ProviderPool::new(&config(vec![provider("a", 0, None)], 0.2));
    assert!(pool.iter_candidates("gpt-4").is_empty());
    assert_eq!(names(&pool.candidates_for_any()), ["a"]);
}

struct ScriptedClient {
    response: Result<(u16, &'static str), &'static str>,
}

impl UpstreamClient for ScriptedClient {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamError>> + Send + 'a>> {
        assert_eq!(req.method, HttpMethod::Get);
        assert!(!req.want_stream);
        Box::pin(async move {
            match self.response {
                Ok((status, body)) => Ok(UpstreamResponse {
                    status,
                    headers: vec![("content-type".into(), "application/json".into())],
                    body: UpstreamBody::Bytes(Bytes::from_static(body.as_bytes())),
                }),
                Err(message) => Err(UpstreamError::new(message)),
            }
        })
    }
}

#[tokio::test]
async fn hydration_installs_upstream_model_list() {
    let pool = ProviderPool::new(&config(vec![provider("a", 0, None)], 0.2));
    let client = ScriptedClient {
        response: Ok((200, r#"{"data":[{"id":"gpt-4"},{"id":"gpt-4o"}]}"#)),
    };

    pool.hydrate_missing(&client, Duration::from_secs(5)).await;
    assert_eq!(names(&pool.iter_candidates("gpt-4o")), ["a"]);
    assert!(pool.iter_candidates("claude-3-opus").is_empty());
}

#[tokio::test]
async fn hydration_failure_falls_back_to_wildcard() {
    let pool = ProviderPool::new(&config(vec![provider("a", 0, None)], 0.2));
    let client = ScriptedClient {
        response: Err("connection refused"),
    };

    pool.hydrate_missing(&client, Duration::from_secs(5)).await;
    // Wildcard keeps the provider usable for any model.
    assert_eq!(names(&pool.iter_candidates("anything-at-all")), ["a"]);
}

#[tokio::test]
async fn status_snapshot_reflects_cooldown() {
    let pool = ProviderPool::new(&config(vec![provider("a", 3, Some(vec!["gpt-4"]))], 60.0));
    pool.mark_failure(&pool.get("a").unwrap(), "HTTP 500");
    pool.record_probe("a", 42);

    let snapshot = pool.status_snapshot();
    assert_eq!(snapshot.len(), 1);
    let status = &snapshot[0];
    assert_eq!(status.name, "a");
    assert!(status.enabled);
    assert!(status.auto_disabled);
    assert_eq!(status.status, "auto_disabled");
    assert_eq!(status.last_error.as_deref(), Some("HTTP 500"));
    assert_eq!(status.priority, 3);
    assert_eq!(status.last_test_latency_ms, Some(42));
    assert!(status.cooldown_remaining_seconds.unwrap() > 50.0);
}
