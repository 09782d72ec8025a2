// Logging initialisation (tracing-subscriber)

use serde::Deserialize;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "workflow_mq=info";

const LOG_FILE_PREFIX: &str = "workflow-mq.log";

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Development: human readable, with colors
    #[default]
    Pretty,
    /// Production: one JSON object per event
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub format: LogFormat,
    /// Also write JSON logs to a daily-rolling file in this directory
    pub directory: Option<PathBuf>,
}

/// Install the global tracing subscriber
///
/// Keep the returned guard alive for the lifetime of the process when file
/// logging is enabled; dropping it flushes and stops the background writer.
pub fn init_logging(settings: &LogSettings) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))?;

    let (file_layer, guard) = match &settings.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    match settings.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init()?,
    }

    tracing::info!(
        format = ?settings.format,
        directory = ?settings.directory,
        "Logging initialised"
    );
    Ok(guard)
}
