pub mod client;
pub mod config;
pub mod headers;
pub mod logsink;
pub mod matcher;
pub mod pool;
pub mod state;
pub mod status;

pub use client::{
    HttpMethod, QueryItems, UpstreamBody, UpstreamClient, UpstreamError, UpstreamRequest,
    UpstreamResponse,
};
pub use config::{
    AppConfig, ConfigError, ConfigSource, FileConfigSource, ModelRule, PreferencesConfig,
    ProviderConfig, load_config,
};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use logsink::{MemoryLogSink, NoopLogSink, RequestLogRecord, RequestLogSink, SharedLogSink};
pub use pool::ProviderPool;
pub use state::{ModelPatterns, ProbeResult, ProviderState};
pub use status::{ProviderStatus, StatusHub, StatusUpdate};
