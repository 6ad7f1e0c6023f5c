//! Log setup for the bridge binary and the test suites.

use crate::config::BridgeConfig;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    prelude::*,
    EnvFilter, Layer, Registry,
};

fn filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Console output on stderr plus daily rolling files under `config.log_dir`.
///
/// `RUST_LOG` wins over `config.log_filter`.
pub fn init_logging(config: &BridgeConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.log_dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&config.log_prefix)
        .build(&config.log_dir)?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let console = fmt::layer()
        .with_target(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(std::io::stderr);

    let file: Box<dyn Layer<Registry> + Send + Sync> = if config.log_json {
        fmt::layer()
            .json()
            .with_current_span(false)
            .with_timer(ChronoUtc::rfc_3339())
            .with_writer(file_writer)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false)
            .with_writer(file_writer)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(file)
        .with(console)
        .with(filter(&config.log_filter))
        .try_init()?;

    // the writer flushes until process exit
    std::mem::forget(guard);

    tracing::info!(dir = ?config.log_dir, json = config.log_json, "logging initialized");
    Ok(())
}

/// Console-only logging for tests; safe to call more than once.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("cockpit_dbus=trace,info"))
        .with_test_writer()
        .try_init();
}
