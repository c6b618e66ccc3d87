use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::Instant;

use crate::config::{ModelRule, ProviderConfig};
use crate::matcher;

/// Effective model rules for a provider. `Pending` means the config had no
/// explicit list and upstream hydration has not completed yet; such a
/// provider serves nothing until hydration resolves it one way or the other.
#[derive(Debug, Clone)]
pub enum ModelPatterns {
    Pending,
    Ready(Vec<ModelRule>),
}

#[derive(Debug, Clone, Default)]
struct Cooldown {
    until: Option<Instant>,
    last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub latency_ms: u64,
    pub at: OffsetDateTime,
}

/// Mutable runtime record for one configured provider. The pool swaps whole
/// state lists on reload; within a list, each field guards itself.
#[derive(Debug)]
pub struct ProviderState {
    config: Arc<ProviderConfig>,
    patterns: RwLock<ModelPatterns>,
    cooldown: Mutex<Cooldown>,
    probe: Mutex<Option<ProbeResult>>,
}

impl ProviderState {
    pub fn new(config: ProviderConfig) -> Self {
        let patterns = match &config.models {
            Some(rules) => ModelPatterns::Ready(rules.clone()),
            None => ModelPatterns::Pending,
        };
        Self {
            config: Arc::new(config),
            patterns: RwLock::new(patterns),
            cooldown: Mutex::new(Cooldown::default()),
            probe: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn needs_hydration(&self) -> bool {
        matches!(
            *self.patterns.read().expect("patterns lock poisoned"),
            ModelPatterns::Pending
        )
    }

    pub fn set_patterns(&self, rules: Vec<ModelRule>) {
        *self.patterns.write().expect("patterns lock poisoned") = ModelPatterns::Ready(rules);
    }

    /// Effective rule list for listings; a pending provider shows as a
    /// wildcard because selection will rely on runtime failures anyway.
    pub fn effective_patterns(&self) -> Vec<ModelRule> {
        match &*self.patterns.read().expect("patterns lock poisoned") {
            ModelPatterns::Pending => vec![ModelRule::Pattern("*".to_string())],
            ModelPatterns::Ready(rules) => rules.clone(),
        }
    }

    pub fn supports_model(&self, model: &str) -> bool {
        match &*self.patterns.read().expect("patterns lock poisoned") {
            ModelPatterns::Pending => false,
            ModelPatterns::Ready(rules) => matcher::supports_model(rules, model),
        }
    }

    /// The concrete id to send upstream for `model`, when this provider
    /// serves it.
    pub fn provider_model(&self, model: &str) -> Option<String> {
        match &*self.patterns.read().expect("patterns lock poisoned") {
            ModelPatterns::Pending => None,
            ModelPatterns::Ready(rules) => matcher::resolve_model(rules, model),
        }
    }

    pub fn is_cooling(&self, now: Instant) -> bool {
        self.cooldown
            .lock()
            .expect("cooldown lock poisoned")
            .until
            .is_some_and(|until| now < until)
    }

    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        self.cooldown
            .lock()
            .expect("cooldown lock poisoned")
            .until
            .and_then(|until| until.checked_duration_since(now))
            .filter(|remaining| !remaining.is_zero())
    }

    pub fn last_error(&self) -> Option<String> {
        self.cooldown
            .lock()
            .expect("cooldown lock poisoned")
            .last_error
            .clone()
    }

    /// Records a failure. A zero period records the reason without freezing.
    pub fn begin_cooldown(&self, period: Duration, reason: String) {
        let mut cooldown = self.cooldown.lock().expect("cooldown lock poisoned");
        cooldown.last_error = Some(reason);
        if period.is_zero() {
            return;
        }
        cooldown.until = Some(Instant::now() + period);
    }

    pub fn clear_cooldown(&self) {
        let mut cooldown = self.cooldown.lock().expect("cooldown lock poisoned");
        cooldown.until = None;
        cooldown.last_error = None;
    }

    pub fn record_probe(&self, latency_ms: u64) {
        *self.probe.lock().expect("probe lock poisoned") = Some(ProbeResult {
            latency_ms,
            at: OffsetDateTime::now_utc(),
        });
    }

    pub fn probe(&self) -> Option<ProbeResult> {
        self.probe.lock().expect("probe lock poisoned").clone()
    }
}
