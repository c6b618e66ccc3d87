pub mod auth;
pub mod engine;
pub mod error;
pub mod intent;
pub mod sanitize;
pub mod upstream;
pub mod url;

pub use engine::{DispatchOutcome, InboundRequest, ProxyEngine, spawn_config_watcher};
pub use error::GatewayError;
