//! Logging setup for the `sqlperms` binary.
//!
//! Console output always goes to stderr so stdout stays free for the run
//! summary. An optional log file receives the same events without ANSI colors.

use crate::Result;
use crate::error::SqlPermsError;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{Layer, Registry, filter::LevelFilter, prelude::*};

/// Console/file log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logging options collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Verbosity level (0=INFO, 1=DEBUG, 2+=TRACE)
    pub verbose: u8,
    /// Only show ERROR level logs
    pub quiet: bool,
    /// Line format
    pub format: LogFormat,
    /// Optional file that receives a copy of every event
    pub log_file: Option<PathBuf>,
}

/// Maps the verbosity flags to a maximum level.
pub fn level_for(verbose: u8, quiet: bool) -> tracing::Level {
    match (quiet, verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::INFO,
        (false, 1) => tracing::Level::DEBUG,
        (false, _) => tracing::Level::TRACE,
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn fmt_layer<W>(format: LogFormat, writer: W, ansi: bool, level: LevelFilter) -> BoxedLayer
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => layer.with_filter(level).boxed(),
        LogFormat::Json => layer.json().with_filter(level).boxed(),
    }
}

/// Initializes structured logging.
///
/// # Errors
/// Returns a configuration error if the log file cannot be created or a
/// global subscriber is already installed.
///
/// # Example
/// ```rust,no_run
/// use sqlperms_core::logging::{LoggingConfig, init_logging};
///
/// init_logging(&LoggingConfig { verbose: 1, ..Default::default() })
///     .expect("Failed to initialize logging");
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = LevelFilter::from_level(level_for(config.verbose, config.quiet));

    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(config.format, std::io::stderr, true, level)];

    if let Some(path) = &config.log_file {
        let file = std::fs::File::create(path).map_err(|e| SqlPermsError::Io {
            context: format!("Failed to create log file {}", path.display()),
            source: e,
        })?;
        layers.push(fmt_layer(config.format, Mutex::new(file), false, level));
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| SqlPermsError::configuration(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}
