use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directives: `RUST_LOG` wins, otherwise `level` for this crate with
/// the HTTP stack kept quiet.
pub fn filter_directives(level: &str) -> String {
    let level = match level.trim() {
        "" => "info",
        other => other,
    };
    format!("{level},hyper=warn,reqwest=warn,h2=warn")
}

/// Install the global subscriber. Logs go to stderr so stdout stays free for
/// NDJSON events. Safe to call more than once; later calls are ignored.
pub fn init(level: &str, json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}
