//! Logging setup on `tracing-subscriber`.
//!
//! [`LoggingBuilder`] starts from a [`LoggingConfig`] and installs a single
//! fmt layer behind an [`EnvFilter`]. `RUST_LOG`, when set, replaces the
//! configured base level; `[logging.filters]` directives apply on top of
//! either.
//!
//! ```rust,ignore
//! use yuzu_runtime::logging::LoggingBuilder;
//!
//! LoggingBuilder::from_config(&config.logging)
//!     .directive("yuzu_framework=trace")
//!     .init();
//! ```
//!
//! Setting `span_events.new` and `span_events.close` logs every `dispatch`
//! span with its busy time.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LogLevel, LogOutput, LoggingConfig, SpanEventConfig};

/// File name used when `file_path` is unset or names a directory.
const DEFAULT_LOG_FILE: &str = "yuzu.log";

impl SpanEventConfig {
    pub fn fmt_span(&self) -> FmtSpan {
        [
            (self.new, FmtSpan::NEW),
            (self.enter, FmtSpan::ENTER),
            (self.exit, FmtSpan::EXIT),
            (self.close, FmtSpan::CLOSE),
        ]
        .into_iter()
        .filter(|(on, _)| *on)
        .fold(FmtSpan::NONE, |acc, (_, span)| acc | span)
    }
}

/// Installs the global subscriber described by `config`. A subscriber that
/// is already installed is left in place.
pub fn init_from_config(config: &LoggingConfig) {
    LoggingBuilder::from_config(config).init();
}

/// Global subscriber setup.
#[derive(Debug, Clone, Default)]
pub struct LoggingBuilder {
    config: LoggingConfig,
    directives: Vec<String>,
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies `config`; its per-target filters become directives sorted by
    /// target.
    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut filters: Vec<_> = config.filters.iter().collect();
        filters.sort_by_key(|(target, _)| *target);
        Self {
            config: config.clone(),
            directives: filters
                .into_iter()
                .map(|(target, level)| format!("{target}={level}"))
                .collect(),
        }
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    /// Adds a directive such as `yuzu_runtime=trace`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn span_events(mut self, events: SpanEventConfig) -> Self {
        self.config.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.config.output = output;
        self
    }

    /// Writes to `path` instead of a standard stream.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output = LogOutput::File;
        self.config.file_path = Some(path.into());
        self
    }

    pub fn thread_ids(mut self, enabled: bool) -> Self {
        self.config.thread_ids = enabled;
        self
    }

    /// Includes source file and line in every event.
    pub fn file_location(mut self, enabled: bool) -> Self {
        self.config.file_location = enabled;
        self
    }

    pub fn directives(&self) -> &[String] {
        &self.directives
    }

    fn filter(&self) -> EnvFilter {
        let base = LevelFilter::from_level(self.config.level.to_tracing_level());
        let mut filter = EnvFilter::builder()
            .with_default_directive(base.into())
            .from_env_lossy();

        for directive in &self.directives {
            match directive.parse::<Directive>() {
                Ok(d) => filter = filter.add_directive(d),
                Err(e) => eprintln!("yuzu: ignoring log directive {directive:?}: {e}"),
            }
        }
        filter
    }

    /// Directory and file name of the log file.
    fn log_file(&self) -> (&Path, &OsStr) {
        let Some(path) = self.config.file_path.as_deref() else {
            return (Path::new("."), OsStr::new(DEFAULT_LOG_FILE));
        };
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let name = path.file_name().unwrap_or(OsStr::new(DEFAULT_LOG_FILE));
        (dir, name)
    }

    fn writer(&self) -> BoxMakeWriter {
        match self.config.output {
            LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
            LogOutput::File => {
                let (dir, name) = self.log_file();
                BoxMakeWriter::new(tracing_appender::rolling::never(dir, name))
            }
        }
    }

    /// Installs the subscriber, ignoring one that is already installed.
    pub fn init(self) {
        let _ = self.try_init();
    }

    pub fn try_init(self) -> Result<(), TryInitError> {
        let config = &self.config;
        let layer = fmt::layer()
            .with_writer(self.writer())
            .with_span_events(config.span_events.fmt_span())
            .with_thread_ids(config.thread_ids)
            .with_file(config.file_location)
            .with_line_number(config.file_location);

        let layer = match config.format {
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Full => layer.boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            #[cfg(feature = "json-log")]
            LogFormat::Json => layer.json().boxed(),
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(self.filter())
            .try_init()
    }
}
