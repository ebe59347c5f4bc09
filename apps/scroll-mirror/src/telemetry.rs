pub mod logging {
    //! Process-wide `tracing` setup for the binary.

    use std::fs::OpenOptions;
    use std::path::{Path, PathBuf};
    use std::sync::OnceLock;

    use clap::ValueEnum;
    use tracing::subscriber::SetGlobalDefaultError;
    use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
    use tracing_subscriber::EnvFilter;

    pub const FILTER_ENV: &str = "SCROLL_MIRROR_LOG_FILTER";

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        Warn,
        #[default]
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        fn directive(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("cannot open log file {}: {source}", path.display())]
        OpenFile {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("cannot install the log subscriber: {0}")]
        GlobalDefault(#[from] SetGlobalDefaultError),
    }

    /// Keeps the background log writer alive for the life of the process.
    static WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Later calls are no-ops.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if WRITER_GUARD.get().is_some() {
            return Ok(());
        }

        let (writer, guard) = writer_for(config.file.as_deref())?;
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter(config.level))
            .with_target(config.level >= LogLevel::Debug)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;

        let _ = WRITER_GUARD.set(guard);
        Ok(())
    }

    fn writer_for(file: Option<&Path>) -> Result<(NonBlocking, WorkerGuard), InitError> {
        let Some(path) = file else {
            return Ok(tracing_appender::non_blocking(std::io::stderr()));
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| InitError::OpenFile {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(tracing_appender::non_blocking(file))
    }

    fn env_filter(level: LogLevel) -> EnvFilter {
        match std::env::var(FILTER_ENV) {
            Ok(filter) => EnvFilter::new(filter),
            Err(_) => EnvFilter::new(default_filter_for(level)),
        }
    }

    /// Workspace crates log at `level`; dependencies stay at warn unless
    /// `level` is quieter still.
    pub fn default_filter_for(level: LogLevel) -> String {
        let floor = level.min(LogLevel::Warn).directive();
        let level = level.directive();
        format!("{floor},scroll_mirror={level},viewport_sync={level},transport_bus={level}")
    }

}
