//! Tracing subscriber initialization.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber. Verbosity from the command line beats the
/// configured filter; `RUST_LOG` beats both. Safe to call more than once
/// (later calls are no-ops).
pub fn init(config: &LoggingConfig, verbose: u8) {
    if !config.stdout {
        return;
    }

    let default_directive = match verbose {
        0 => config.filter.as_deref().unwrap_or("info"),
        1 => "treecache=debug,info",
        _ => "treecache=trace,debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.stdout_format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    // A second init in the same process keeps the first subscriber.
    let _ = result;
}
