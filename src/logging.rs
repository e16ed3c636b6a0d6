use std::env;

const DEFAULT_FILTER: &str = "info";

fn filter_directives(rust_log: Option<String>) -> String {
    match rust_log {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Install the process-wide logger. Safe to call more than once.
pub fn init() {
    let directives = filter_directives(env::var("RUST_LOG").ok());
    let _ = pretty_env_logger::formatted_timed_builder()
        .parse_filters(&directives)
        .try_init();
}
