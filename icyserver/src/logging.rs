//! Logging initialization from the `logging` config section.

use icyconfig::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Install the global subscriber.  `logging.level` is a filter directive
/// (`info`, `icystation=debug,info`, ...); `logging.json` switches to the
/// JSON formatter for log shippers.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| {
        eprintln!("invalid logging.level {:?}, falling back to info", config.level);
        EnvFilter::new("info")
    });

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
