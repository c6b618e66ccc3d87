use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use unigate_common::parse_bool_literal;

pub const DEFAULT_MODEL_TIMEOUT: f64 = 20.0;
pub const DEFAULT_COOLDOWN_PERIOD: f64 = 300.0;
pub const DEFAULT_MODELS_ENDPOINT: &str = "/v1/models";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid YAML in config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{0}")]
    Invalid(String),
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// One entry of a provider's `model:` list: either a capability pattern
/// (exact id or glob) or an `alias: canonical-id` rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelRule {
    Pattern(String),
    Alias { alias: String, target: String },
}

impl ModelRule {
    /// The client-facing identifier this rule answers to.
    pub fn exposed_id(&self) -> &str {
        match self {
            ModelRule::Pattern(pattern) => pattern,
            ModelRule::Alias { alias, .. } => alias,
        }
    }
}

impl<'de> Deserialize<'de> for ModelRule {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Pattern(String),
            Alias(BTreeMap<String, String>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Pattern(pattern) => Ok(ModelRule::Pattern(pattern)),
            Repr::Alias(map) => {
                let mut entries = map.into_iter();
                let (alias, target) = entries
                    .next()
                    .ok_or_else(|| D::Error::custom("model alias entry must not be empty"))?;
                if entries.next().is_some() {
                    return Err(D::Error::custom(
                        "model alias entry must map exactly one alias to one model id",
                    ));
                }
                Ok(ModelRule::Alias { alias, target })
            }
        }
    }
}

impl Serialize for ModelRule {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ModelRule::Pattern(pattern) => serializer.serialize_str(pattern),
            ModelRule::Alias { alias, target } => {
                let mut map = BTreeMap::new();
                map.insert(alias.as_str(), target.as_str());
                map.serialize(serializer)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "provider")]
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub priority: i32,
    /// Absent means "all models, hydrated from upstream on startup".
    #[serde(default, rename = "model", skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<ModelRule>>,
    #[serde(default = "default_models_endpoint")]
    pub models_endpoint: String,
    #[serde(default = "default_enabled", deserialize_with = "de_loose_bool")]
    pub enabled: bool,
    /// Overrides `preferences.cooldown_period` for this provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_period: Option<f64>,
}

impl ProviderConfig {
    pub fn normalized_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn normalized_models_endpoint(&self) -> String {
        let endpoint = self.models_endpoint.trim();
        let endpoint = if endpoint.is_empty() {
            DEFAULT_MODELS_ENDPOINT
        } else {
            endpoint
        };
        if endpoint.starts_with('/') {
            endpoint.to_string()
        } else {
            format!("/{endpoint}")
        }
    }
}

fn default_models_endpoint() -> String {
    DEFAULT_MODELS_ENDPOINT.to_string()
}

fn default_enabled() -> bool {
    true
}

/// Accepts booleans, numbers, and the recognised truthy/falsy string
/// literals, matching what operators put into hand-edited YAML.
fn de_loose_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    match value {
        serde_yaml::Value::Null => Ok(true),
        serde_yaml::Value::Bool(flag) => Ok(flag),
        serde_yaml::Value::Number(number) => Ok(number.as_f64().is_some_and(|n| n != 0.0)),
        serde_yaml::Value::String(text) => parse_bool_literal(&text)
            .ok_or_else(|| D::Error::custom(format!("'{text}' is not a boolean-like value"))),
        other => Err(D::Error::custom(format!(
            "expected a boolean-like value, got {other:?}"
        ))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferencesConfig {
    #[serde(default = "default_model_timeout")]
    pub model_timeout: f64,
    #[serde(default = "default_cooldown_period")]
    pub cooldown_period: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            cooldown_period: DEFAULT_COOLDOWN_PERIOD,
            proxy: None,
        }
    }
}

fn default_model_timeout() -> f64 {
    DEFAULT_MODEL_TIMEOUT
}

fn default_cooldown_period() -> f64 {
    DEFAULT_COOLDOWN_PERIOD
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api_key: String,
    #[serde(default)]
    pub preferences: PreferencesConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl AppConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut config: AppConfig = serde_yaml::from_str(raw)?;
        config.api_key = config.api_key.trim().to_string();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(invalid("api_key must be a non-empty string"));
        }
        if !self.preferences.model_timeout.is_finite() || self.preferences.model_timeout <= 0.0 {
            return Err(invalid("model_timeout must be greater than zero"));
        }
        if !self.preferences.cooldown_period.is_finite() || self.preferences.cooldown_period < 0.0 {
            return Err(invalid("cooldown_period must be zero or greater"));
        }
        if self.providers.is_empty() {
            return Err(invalid(
                "at least one provider must be configured under 'providers'",
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(invalid("provider name must be a non-empty string"));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(invalid(format!(
                    "provider name '{}' is not unique",
                    provider.name
                )));
            }
            if provider.base_url.is_empty() {
                return Err(invalid(format!(
                    "provider base_url for {} must be a non-empty string",
                    provider.name
                )));
            }
            if provider.api_key.is_empty() {
                return Err(invalid(format!(
                    "provider api_key for {} must be a non-empty string",
                    provider.name
                )));
            }
            if let Some(models) = &provider.models {
                if models.is_empty() {
                    return Err(invalid(format!(
                        "provider model list for {} must be non-empty when present",
                        provider.name
                    )));
                }
                for rule in models {
                    if rule.exposed_id().is_empty() {
                        return Err(invalid(format!(
                            "provider model value for {} must be a non-empty string",
                            provider.name
                        )));
                    }
                    if let ModelRule::Alias { target, .. } = rule
                        && target.is_empty()
                    {
                        return Err(invalid(format!(
                            "provider model alias target for {} must be a non-empty string",
                            provider.name
                        )));
                    }
                }
            }
            if let Some(period) = provider.cooldown_period
                && (!period.is_finite() || period < 0.0)
            {
                return Err(invalid(format!(
                    "provider cooldown_period for {} must be zero or greater",
                    provider.name
                )));
            }
        }
        Ok(())
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    AppConfig::from_yaml_str(&raw)
}

/// The boundary the engine reloads configuration through. The watcher polls
/// `poll_changed`, applies a successful `load`, and only then `acknowledge`s,
/// so a broken edit keeps being retried until the operator fixes it.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<AppConfig, ConfigError>;
    fn poll_changed(&self) -> bool;
    fn acknowledge(&self);
}

pub struct FileConfigSource {
    path: PathBuf,
    seen_mtime: Mutex<Option<SystemTime>>,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mtime = mtime_of(&path);
        Self {
            path,
            seen_mtime: Mutex::new(mtime),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn mtime_of(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<AppConfig, ConfigError> {
        load_config(&self.path)
    }

    fn poll_changed(&self) -> bool {
        let Some(current) = mtime_of(&self.path) else {
            return false;
        };
        let seen = self.seen_mtime.lock().expect("mtime lock poisoned");
        match *seen {
            Some(previous) => current > previous,
            None => true,
        }
    }

    fn acknowledge(&self) {
        let mut seen = self.seen_mtime.lock().expect("mtime lock poisoned");
        *seen = mtime_of(&self.path);
    }
}
