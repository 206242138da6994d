//! Logging setup from the `logging` config section.

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use claw_pwa_core::config::LoggingConfig;

/// Filter directives: `--verbose` beats the configured level, which beats `info`.
/// Per-crate `filters` are appended.
pub fn filter_directives(verbose: bool, logging: &LoggingConfig) -> String {
    let base = if verbose {
        "debug".to_string()
    } else {
        logging.level.clone().unwrap_or_else(|| "info".to_string())
    };
    std::iter::once(base)
        .chain(logging.filters.iter().cloned())
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. `RUST_LOG` overrides everything.
pub fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(verbose, logging)));

    let writer = match logging.output.as_str() {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        let mut logging = LoggingConfig::default();
        assert_eq!(filter_directives(false, &logging), "info");
        assert_eq!(filter_directives(true, &logging), "debug");

        logging.level = Some("warn".into());
        logging.filters = vec!["claw_pwa_client=trace".into()];
        assert_eq!(filter_directives(false, &logging), "warn,claw_pwa_client=trace");
        assert_eq!(filter_directives(true, &logging), "debug,claw_pwa_client=trace");
    }
}
