use crate::cards::CardStore;
use crate::upstream::UpstreamClient;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value = "ecorelay.db")]
    pub database: String,
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    pub backend_base_url: String,
    #[arg(long, default_value_t = crate::constants::DEFAULT_HEARTBEAT_SECS)]
    pub heartbeat_secs: u64,
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
    #[arg(long, default_value_t = 2 * 1024 * 1024)]
    pub max_body_size: usize,
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,
}

impl Args {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub upstream: UpstreamClient,
    pub store: CardStore,
    pub args: Arc<Args>,
}
