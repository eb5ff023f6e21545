use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Overrides the level flag with a full filter directive, e.g.
/// `jx1000_device=trace,warn`.
pub const LOG_ENV: &str = "JX1000_LOG";

const CRATE_TARGETS: [&str; 5] = [
    "jx1000",
    "jx1000_transport",
    "jx1000_frame",
    "jx1000_device",
    "jx1000_modbus",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// The driver crates log at `level`; dependencies stay at warn or quieter.
pub fn default_filter(level: LogLevel) -> EnvFilter {
    let level = level.as_filter();
    let mut directives = vec![level.min(LevelFilter::WARN).to_string()];
    directives.extend(CRATE_TARGETS.iter().map(|target| format!("{target}={level}")));
    EnvFilter::new(directives.join(","))
}

fn filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| default_filter(level))
}

/// Log to stderr. Thread names are kept: the receive loop, upload worker and
/// simulators each log from their own thread.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter(level))
        .with_ansi(false)
        .with_target(false)
        .with_thread_names(true);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}
