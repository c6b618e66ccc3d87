use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use rand::Rng;
use rand::seq::SliceRandom;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{HttpMethod, UpstreamBody, UpstreamClient, UpstreamRequest};
use crate::config::{AppConfig, ModelRule, PreferencesConfig};
use crate::state::ProviderState;
use crate::status::ProviderStatus;

/// Priority-ordered collection of provider states.
///
/// Reads work on an immutable snapshot of the state list; `rebuild` swaps the
/// whole list atomically, so in-flight requests keep the states they started
/// with. Per-state fields (cooldown, patterns) guard themselves.
pub struct ProviderPool {
    states: ArcSwap<Vec<Arc<ProviderState>>>,
    preferences: ArcSwap<PreferencesConfig>,
}

impl ProviderPool {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            states: ArcSwap::from_pointee(build_states(config)),
            preferences: ArcSwap::from_pointee(config.preferences.clone()),
        }
    }

    /// Discards all runtime state and rebuilds from `config`. Providers that
    /// were cooling come back healthy; hydration starts over.
    pub fn rebuild(&self, config: &AppConfig) {
        self.preferences.store(Arc::new(config.preferences.clone()));
        self.states.store(Arc::new(build_states(config)));
        info!(providers = config.providers.len(), "provider pool rebuilt");
    }

    pub fn preferences(&self) -> Arc<PreferencesConfig> {
        self.preferences.load_full()
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<ProviderState>>> {
        self.states.load_full()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProviderState>> {
        self.states
            .load()
            .iter()
            .find(|state| state.name() == name)
            .cloned()
    }

    /// Eligible states for `model`: enabled, not cooling, and serving the
    /// model. Only the top priority tier is returned, shuffled to balance
    /// load within the tier.
    pub fn iter_candidates(&self, model: &str) -> Vec<Arc<ProviderState>> {
        self.iter_candidates_with(model, &mut rand::rng())
    }

    pub fn iter_candidates_with<R: Rng + ?Sized>(
        &self,
        model: &str,
        rng: &mut R,
    ) -> Vec<Arc<ProviderState>> {
        self.top_tier(Some(model), rng)
    }

    /// Same selection without model filtering, for endpoints like model
    /// listing that any provider can answer.
    pub fn candidates_for_any(&self) -> Vec<Arc<ProviderState>> {
        self.candidates_for_any_with(&mut rand::rng())
    }

    pub fn candidates_for_any_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Arc<ProviderState>> {
        self.top_tier(None, rng)
    }

    fn top_tier<R: Rng + ?Sized>(
        &self,
        model: Option<&str>,
        rng: &mut R,
    ) -> Vec<Arc<ProviderState>> {
        let now = Instant::now();
        let states = self.states.load();
        let mut available: Vec<Arc<ProviderState>> = states
            .iter()
            .filter(|state| state.config().enabled && !state.is_cooling(now))
            .filter(|state| model.is_none_or(|m| state.supports_model(m)))
            .cloned()
            .collect();

        let Some(highest) = available
            .iter()
            .map(|state| state.config().priority)
            .max()
        else {
            return Vec::new();
        };
        available.retain(|state| state.config().priority == highest);
        available.shuffle(rng);
        available
    }

    /// Drives the cooldown machine after a retryable failure. The freeze
    /// length is the provider's own `cooldown_period` when set, otherwise the
    /// global preference; zero records the reason without freezing.
    pub fn mark_failure(&self, state: &ProviderState, reason: impl Into<String>) {
        let reason = reason.into();
        let seconds = state
            .config()
            .cooldown_period
            .unwrap_or(self.preferences.load().cooldown_period);
        if seconds <= 0.0 {
            debug!(
                provider = state.name(),
                reason = %reason,
                "cooldown disabled; recording failure only"
            );
            state.begin_cooldown(Duration::ZERO, reason);
            return;
        }
        warn!(
            provider = state.name(),
            seconds,
            reason = %reason,
            "provider entering cooldown"
        );
        state.begin_cooldown(Duration::from_secs_f64(seconds), reason);
    }

    pub fn mark_success(&self, state: &ProviderState) {
        state.clear_cooldown();
    }

    /// Clears a provider's cooldown by name. Returns false for unknown names.
    pub fn unfreeze(&self, name: &str) -> bool {
        match self.get(name) {
            Some(state) => {
                state.clear_cooldown();
                info!(provider = name, "provider manually unfrozen");
                true
            }
            None => false,
        }
    }

    pub fn record_probe(&self, name: &str, latency_ms: u64) -> bool {
        match self.get(name) {
            Some(state) => {
                state.record_probe(latency_ms);
                true
            }
            None => false,
        }
    }

    /// Effective patterns per enabled provider, for admin surfaces and the
    /// unified model listing.
    pub fn list_models(&self) -> Vec<(String, Vec<ModelRule>)> {
        self.states
            .load()
            .iter()
            .filter(|state| state.config().enabled)
            .map(|state| (state.name().to_string(), state.effective_patterns()))
            .collect()
    }

    pub fn status_snapshot(&self) -> Vec<ProviderStatus> {
        let now = Instant::now();
        self.states
            .load()
            .iter()
            .map(|state| {
                let enabled = state.config().enabled;
                let auto_disabled = state.is_cooling(now);
                let status = if !enabled {
                    "disabled"
                } else if auto_disabled {
                    "auto_disabled"
                } else {
                    "enabled"
                };
                let probe = state.probe();
                ProviderStatus {
                    name: state.name().to_string(),
                    enabled,
                    auto_disabled,
                    status,
                    cooldown_remaining_seconds: state
                        .cooldown_remaining(now)
                        .map(|remaining| remaining.as_secs_f64()),
                    last_error: state.last_error(),
                    priority: state.config().priority,
                    last_test_latency_ms: probe.as_ref().map(|p| p.latency_ms),
                    last_test_time: probe.map(|p| p.at),
                }
            })
            .collect()
    }

    /// Fetches model lists for every enabled provider that was configured
    /// without one. Failures fall back to a wildcard so the provider stays
    /// usable; selection then relies on runtime failures.
    pub async fn hydrate_missing(&self, client: &dyn UpstreamClient, timeout: Duration) {
        let pending: Vec<Arc<ProviderState>> = self
            .states
            .load()
            .iter()
            .filter(|state| state.config().enabled && state.needs_hydration())
            .cloned()
            .collect();
        if pending.is_empty() {
            return;
        }

        join_all(
            pending
                .iter()
                .map(|state| hydrate_state(client, state, timeout)),
        )
        .await;
    }
}

fn build_states(config: &AppConfig) -> Vec<Arc<ProviderState>> {
    config
        .providers
        .iter()
        .cloned()
        .map(|provider| Arc::new(ProviderState::new(provider)))
        .collect()
}

async fn hydrate_state(client: &dyn UpstreamClient, state: &ProviderState, timeout: Duration) {
    let config = state.config();
    let url = format!(
        "{}{}",
        config.normalized_base_url(),
        config.normalized_models_endpoint()
    );
    info!(provider = state.name(), url = %url, "fetching model list");

    let request = UpstreamRequest {
        method: HttpMethod::Get,
        url,
        headers: vec![(
            "authorization".to_string(),
            format!("Bearer {}", config.api_key),
        )],
        query: Vec::new(),
        body: None,
        timeout,
        want_stream: false,
    };

    let ids = match client.send(request).await {
        Ok(response) if (200..300).contains(&response.status) => match response.body {
            UpstreamBody::Bytes(bytes) => parse_model_ids(&bytes),
            UpstreamBody::Stream(_) => None,
        },
        Ok(response) => {
            warn!(
                provider = state.name(),
                status = response.status,
                "model list request rejected"
            );
            None
        }
        Err(err) => {
            warn!(provider = state.name(), error = %err, "model list request failed");
            None
        }
    };

    match ids {
        Some(ids) if !ids.is_empty() => {
            info!(provider = state.name(), count = ids.len(), "hydrated model list");
            state.set_patterns(ids.into_iter().map(ModelRule::Pattern).collect());
        }
        _ => {
            warn!(
                provider = state.name(),
                "falling back to wildcard model pattern"
            );
            state.set_patterns(vec![ModelRule::Pattern("*".to_string())]);
        }
    }
}

/// Expects the OpenAI-compatible shape `{"data": [{"id": "..."}, ...]}`.
fn parse_model_ids(body: &[u8]) -> Option<Vec<String>> {
    let payload: serde_json::Value = serde_json::from_slice(body).ok()?;
    let data = payload.get("data")?.as_array()?;
    Some(
        data.iter()
            .filter_map(|entry| entry.get("id"))
            .filter_map(|id| id.as_str())
            .filter(|id| !id.is_empty())
            .map(|id| id.to_string())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::parse_model_ids;

    #[test]
    fn model_ids_parse_openai_shape() {
        let body = br#"{"data":[{"id":"gpt-4"},{"id":"gpt-4o"},{"id":""},{"object":"x"}]}"#;
        assert_eq!(
            parse_model_ids(body),
            Some(vec!["gpt-4".to_string(), "gpt-4o".to_string()])
        );
    }

    #[test]
    fn malformed_payloads_yield_none() {
        assert_eq!(parse_model_ids(b"not json"), None);
        assert_eq!(parse_model_ids(br#"{"data": "nope"}"#), None);
        assert_eq!(parse_model_ids(br#"{"models": []}"#), None);
    }
}
