use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use crate::env::get_env_bool;

// sqlx logs every statement at info, with batched upserts that drowns out the pipeline.
const DEFAULT_FILTER: &str = "info,sqlx=warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber. `RUST_LOG` picks the filter, `LOG_JSON` switches to json
/// lines, `LOG_PERF` adds a line with timings whenever an instrumented stage span closes.
pub fn init() {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());

    let builder = if get_env_bool("LOG_PERF").unwrap_or(false) {
        builder.with_span_events(FmtSpan::CLOSE)
    } else {
        builder
    };

    if get_env_bool("LOG_JSON").unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses_test() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
