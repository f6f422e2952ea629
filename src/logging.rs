//! Logging setup for the agency using tracing.

use anyhow::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSection;

/// Initialize logging with console output and, if a log directory is available,
/// a daily rolling file. Keep the returned guard alive to flush the file writer.
pub fn init(config: &LoggingSection) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info,fipa_agency=debug"));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true);

    let log_dir = config.directory.clone().or_else(|| get_log_dir().ok());
    let (file_layer, guard) = match &log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "fipa-agency.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    match &log_dir {
        Some(dir) => tracing::info!("Log directory: {}", dir.display()),
        None => tracing::info!("Logging to console only"),
    }

    Ok(guard)
}

/// Get the log directory path.
fn get_log_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("org", "fipa", "fipa-agency")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

    Ok(dirs.data_dir().join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_into_configured_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingSection {
            filter: "debug".to_string(),
            directory: Some(dir.path().join("logs")),
        };

        let guard = init(&config).unwrap();
        assert!(guard.is_some());
        assert!(dir.path().join("logs").is_dir());
    }
}
