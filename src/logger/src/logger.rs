use std::io::Write;

use env_logger::{Builder, Env, fmt::Color};
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use log::{Level, LevelFilter};
use once_cell::sync::OnceCell;

static INSTANCE: OnceCell<Logger> = OnceCell::new();

/// Process-wide logging facade. Wraps an `env_logger` behind an indicatif
/// [`MultiProgress`], so that progress bars and log lines do not clobber
/// one another.
#[derive(Debug)]
pub struct Logger {
    multi_pg: MultiProgress,
}

impl Logger {
    /// Build and register the global logger.
    ///
    /// `verbosity` maps to a [`LevelFilter`] (0 = Error ... 4+ = Trace).
    /// The `PHYLOSIM_LOG` environment variable takes precedence when set.
    pub fn init(verbosity: u8) {
        let env = Env::default().filter("PHYLOSIM_LOG");

        let logger = Builder::new()
            .filter_level(Self::u8_to_loglevel(verbosity))
            .format(|buf, record| {
                // Errors carry a traceback to their emission site.
                let traceback = match record.level() {
                    Level::Error => format!(
                        "(@ {}:{}) ",
                        record.file().unwrap_or("unknown"),
                        record.line().unwrap_or(0)
                    ),
                    _ => String::new(),
                };

                let mut level_style = buf.style();
                level_style.set_bold(true).set_color(match record.level() {
                    Level::Error => Color::Red,
                    Level::Warn  => Color::Yellow,
                    Level::Info  => Color::Green,
                    Level::Debug => Color::Blue,
                    Level::Trace => Color::Cyan,
                });

                writeln!(
                    buf,
                    "[{} {: <5} {}] {traceback}{}",
                    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S"),
                    level_style.value(record.level()),
                    record.target(),
                    record.args()
                )
            })
            .parse_env(env)
            .build();

        let multi_pg = MultiProgress::new();
        LogWrapper::new(multi_pg.clone(), logger)
            .try_init()
            .expect("Failed to wrap logger with multiprogress");
        INSTANCE.set(Self { multi_pg }).expect("Logger was already initialized");
    }

    fn u8_to_loglevel(verbosity: u8) -> LevelFilter {
        match verbosity {
            0           => LevelFilter::Error,
            1           => LevelFilter::Warn,
            2           => LevelFilter::Info,
            3           => LevelFilter::Debug,
            4..=u8::MAX => LevelFilter::Trace,
        }
    }

    pub fn set_level(verbosity: u8) {
        log::set_max_level(Self::u8_to_loglevel(verbosity));
    }

    /// Access the process-wide [`MultiProgress`], e.g. to attach a dataset
    /// progress bar.
    pub fn multi() -> &'static MultiProgress {
        &INSTANCE.get().expect("Uninitialized logger").multi_pg
    }

    /// Non-panicking [`Logger::multi`], for library contexts where the
    /// logger may not have been initialized.
    pub fn try_multi() -> Option<&'static MultiProgress> {
        INSTANCE.get().map(|logger| &logger.multi_pg)
    }
}
