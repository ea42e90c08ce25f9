use log::{Level, LevelFilter, Log, Metadata, Record};

/// Stderr backend for the `log` facade
pub struct StderrLogger {
    level: LevelFilter,
}

impl StderrLogger {
    /// Default Info, `--debug` adds Debug, `--ddebug` adds Trace (hex dumps)
    pub fn level_for(debug: bool, ddebug: bool) -> LevelFilter {
        if ddebug {
            LevelFilter::Trace
        } else if debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }

    fn format(record: &Record) -> String {
        let prefix = match record.level() {
            Level::Error => "✗ ",
            Level::Warn => "Warning: ",
            _ => "",
        };

        if record.level() <= Level::Info {
            format!("{}{}", prefix, record.args())
        } else {
            format!("[{} {}] {}", record.level(), record.target(), record.args())
        }
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{}", Self::format(record));
        }
    }

    fn flush(&self) {}
}

/// Install the stderr logger; a second call keeps the first logger
pub fn init(debug: bool, ddebug: bool) {
    let level = StderrLogger::level_for(debug, ddebug);

    if log::set_boxed_logger(Box::new(StderrLogger { level })).is_ok() {
        log::set_max_level(level);
    }
}
