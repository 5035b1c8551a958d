use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence; otherwise `default_level` applies to this
/// crate and `warn` to dependencies. Calling it twice is a no-op.
pub fn init_tracing(default_level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,wordcards={}", default_level.as_str().to_lowercase()))
    });
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

/// Maps `-v` counts onto a level starting from `base`.
pub fn level_from_verbosity(base: Level, verbosity: u8) -> Level {
    const LADDER: [Level; 5] = [
        Level::ERROR,
        Level::WARN,
        Level::INFO,
        Level::DEBUG,
        Level::TRACE,
    ];
    let start = LADDER.iter().position(|level| *level == base).unwrap_or(2);
    LADDER[(start + usize::from(verbosity)).min(LADDER.len() - 1)]
}
