use crate::config::Config;
use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// HTTP and WebSocket stacks that log every frame and connection at debug.
const TRANSPORT_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "tungstenite",
    "tokio_tungstenite",
    "mockito",
];

pub struct Logger {}

impl Logger {
    /// Installs a terminal logger at the configured level. Transport crates stay
    /// quiet unless the level is `TRACE`.
    pub fn init_logger(config: &Config) -> Result<(), log::SetLoggerError> {
        let level = config.log_level_filter;
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();
        for module in ignored_modules(level) {
            builder.add_filter_ignore_str(module);
        }

        TermLogger::init(
            level,
            builder.build(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )
    }
}

fn ignored_modules(level: LevelFilter) -> &'static [&'static str] {
    match level {
        LevelFilter::Trace => &[],
        _ => TRANSPORT_MODULES,
    }
}
