use tracing_subscriber::{fmt, EnvFilter};

/// HTTP client internals log every connection at debug; keep them at warn
/// unless `RUST_LOG` names them explicitly.
const QUIET_DEPS: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "h2=warn"];

/// Filter directives for the importer.
///
/// A non-empty `RUST_LOG` is used verbatim. Otherwise `LOG_LEVEL` (or
/// `default_level`) applies to everything except the HTTP stack.
pub fn filter_directives(rust_log: Option<&str>, log_level: Option<&str>, default_level: &str) -> String {
    if let Some(directives) = rust_log.map(str::trim).filter(|s| !s.is_empty()) {
        return directives.to_string();
    }

    let level = log_level
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_level);

    std::iter::once(level)
        .chain(QUIET_DEPS.iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global fmt subscriber. Later calls are no-ops.
pub fn init_tracing(default_level: &str) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let log_level = std::env::var("LOG_LEVEL").ok();
    let directives = filter_directives(rust_log.as_deref(), log_level.as_deref(), default_level);

    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
