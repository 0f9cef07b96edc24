//! Structured logging setup shared by the publisher and router binaries.
//!
//! `RUST_LOG` selects the filter, `LOG_FORMAT` (`json` or `text`, default
//! `text`) selects the output encoding.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber for `service_name`, honoring
/// `RUST_LOG` and `LOG_FORMAT`. Safe to call once at process start; a
/// second call anywhere in the process is a programmer error and will
/// panic, same as `tracing_subscriber`'s own global-default guard.
pub fn init_logging(service_name: &str) {
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => init_json_logging(service_name),
        _ => init_text_logging(service_name),
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_json_logging(service_name: &str) {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_target(true).with_current_span(true))
        .init();
    tracing::info!(service = service_name, format = "json", "logging initialized");
}

fn init_text_logging(service_name: &str) {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true))
        .init();
    tracing::info!(service = service_name, format = "text", "logging initialized");
}
