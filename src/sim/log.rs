use env_logger::Builder;
use log::LevelFilter;

#[derive(PartialEq, PartialOrd, Debug, Default, Clone, Copy)]
pub enum LogLevel {
    #[default]
    None,
    Info,
    Debug,
    Trace,
}

pub fn to_loglevel(ulevel: u64) -> LogLevel {
    match ulevel {
        0 => LogLevel::None,
        1 => LogLevel::Info,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    }
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::None => LevelFilter::Off,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Install the global logger at the configured level. `RUST_LOG` still wins per module.
/// Later calls are ignored so tests can share one process.
pub fn init(ulevel: u64) {
    let _ = Builder::new()
        .filter_level(to_loglevel(ulevel).filter())
        .parse_default_env()
        .format_timestamp(None)
        .try_init();
}
