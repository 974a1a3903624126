use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::fmt;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogFormat, Logging};

fn get_rust_log(level: tracing::level_filters::LevelFilter) -> String {
    format!("INFO,cachefu_service={level}")
}

/// Initializes logging for the current process.
///
/// The filter honors `RUST_LOG` when set, falling back to the configured
/// level for this crate.
pub fn init(config: &Logging) {
    if config.enable_backtraces {
        // SAFETY: this is called once during startup, before any threads
        // that could concurrently read the environment are running.
        unsafe { std::env::set_var("RUST_BACKTRACE", "1") };
    }

    let rust_log = get_rust_log(config.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(rust_log));

    let subscriber = fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_env_filter(filter);

    let format = match config.format {
        LogFormat::Auto => {
            if std::io::stdout().is_terminal() {
                LogFormat::Pretty
            } else {
                LogFormat::Simplified
            }
        }
        other => other,
    };

    match format {
        LogFormat::Pretty => subscriber.pretty().finish().init(),
        LogFormat::Simplified => subscriber.compact().finish().init(),
        LogFormat::Json => subscriber
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .finish()
            .init(),
        LogFormat::Auto => unreachable!("resolved above"),
    }
}
