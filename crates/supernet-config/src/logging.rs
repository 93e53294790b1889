// ── Tracing subscriber setup ──
//
// The engine crates only emit `tracing` events. Applications that want them
// on stderr or in a file call `init_tracing` once at startup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::ConfigError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `[defaults.log]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogSettings {
    /// `EnvFilter` directive, e.g. `"info"` or `"supernet_core=debug"`.
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Log to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

fn default_level() -> String {
    "warn".into()
}

fn build_filter(level: &str) -> Result<EnvFilter, ConfigError> {
    // RUST_LOG wins over the configured level.
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(level).map_err(|e| ConfigError::Validation {
            field: "log.level".into(),
            reason: e.to_string(),
        })
    })
}

/// Install the global subscriber.
///
/// When logging to a file, the returned guard must be held for the life of
/// the application so buffered lines are flushed.
pub fn init_tracing(settings: &LogSettings) -> Result<Option<WorkerGuard>, ConfigError> {
    let (writer, guard) = match settings.file {
        Some(ref path) => {
            let file_name = path.file_name().ok_or_else(|| ConfigError::Validation {
                field: "log.file".into(),
                reason: format!("not a file path: {}", path.display()),
            })?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(std::path::Path::new("."));
            std::fs::create_dir_all(dir)?;

            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let filter = build_filter(&settings.level)?;
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(settings.file.is_none())
        .with_target(true);

    match settings.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()?,
    }

    Ok(guard)
}
