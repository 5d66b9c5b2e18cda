pub mod chat;
pub mod config;
pub mod error;
pub mod models;

pub use error::{ChatError, Result};

use tracing_subscriber::EnvFilter;

/// Initialize logging from `RUST_LOG`, defaulting to `info`
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed by the host app
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
