use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "unigate",
    about = "A unified gateway in front of multiple LLM provider APIs"
)]
pub(crate) struct Cli {
    /// Path to the YAML configuration file; watched for changes while running.
    #[arg(long, env = "UNIGATE_CONFIG", default_value = "config.yaml")]
    pub(crate) config: PathBuf,
    #[arg(long, default_value = "0.0.0.0")]
    pub(crate) host: String,
    #[arg(long, default_value_t = 8686)]
    pub(crate) port: u16,
}
