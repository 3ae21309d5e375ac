use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Console logging for the sidecar.
///
/// stdout carries the IPC protocol, so every log line goes to stderr. The
/// filter comes from `REPORTCARDD_LOG` (e.g. `debug`, `reportcardd=trace`),
/// defaulting to `info` for this crate.
pub fn init(filter: Option<&str>) {
    let env_filter = filter
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new(format!("{}=info", env!("CARGO_CRATE_NAME"))));

    let console_layer = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(false)
        .with_filter(env_filter);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(console_layer).try_init();
}
