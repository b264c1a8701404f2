//! Alumniscope: alumni discovery from rendered search-result pages.
//!
//! For each configured institution the pipeline captures result pages as
//! images, sends them to a vision-capable chat-completions endpoint,
//! tolerantly parses the reply into typed profile records, deduplicates
//! them, and checkpoints the growing dataset atomically after every page.

pub mod config;
pub mod models;
pub mod pipeline;
pub mod session;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` wins when set.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}
