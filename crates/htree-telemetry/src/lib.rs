//! Structured logging init for the htree workspace.
//!
//! Metrics/Prometheus wiring is out of scope here (see `SPEC_FULL.md` Section 1)
//! so this crate is deliberately thin compared to the teacher's `ioi-telemetry`,
//! which also stands up an `axum` metrics server. Only the `tracing` subscriber
//! setup survives the transform.

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Installs the global `tracing` subscriber.
///
/// `json` selects structured JSON output (suitable for log aggregation); when
/// `false`, a human-readable compact formatter is used instead. `env_filter`
/// is the default filter directive used when `RUST_LOG` is unset.
pub fn init_tracing(json: bool, env_filter: &str) -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339());
        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let fmt_layer = fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true);
        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
