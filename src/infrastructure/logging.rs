//! Logging system initialization
//!
//! Console and/or file output through `tracing-subscriber`. Each run writes
//! its own timestamped log file so the history of scheduled runs is kept.
//! `RUST_LOG` overrides the configured level entirely.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use lazy_static::lazy_static;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use super::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "rcp-mirror";

// Keeps the non-blocking file writer flushing until the process exits
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<WorkerGuard>> = Mutex::new(Vec::new());
}

/// `<prefix>-<YYYYmmdd-HHMMSS>.log`
#[must_use]
pub fn log_file_name(now: chrono::NaiveDateTime) -> String {
    format!("{LOG_FILE_PREFIX}-{}.log", now.format("%Y%m%d-%H%M%S"))
}

/// Filter used when `RUST_LOG` is unset.
///
/// HTTP internals are capped below the requested level unless `trace` is asked for.
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{level}'"))?;
    if !level.to_lowercase().contains("trace") {
        for directive in ["reqwest=info", "hyper=warn", "hyper_util=warn", "h2=warn", "rustls=warn"] {
            filter = filter.add_directive(
                directive
                    .parse()
                    .with_context(|| format!("Invalid directive '{directive}'"))?,
            );
        }
    }
    Ok(filter)
}

/// Installs the global subscriber. `log_dir` is used when file output is on
/// and the config does not name a directory.
pub fn init_logging_with_config(config: &LoggingConfig, log_dir: &Path) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(&config.level)?,
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if config.console_output {
        layers.push(
            fmt::Layer::new()
                .with_writer(std::io::stdout)
                .with_target(false)
                .boxed(),
        );
    }

    let mut file_path: Option<PathBuf> = None;
    if config.file_output {
        let dir = config.log_dir.clone().unwrap_or_else(|| log_dir.to_path_buf());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let name = log_file_name(Local::now().naive_local());
        file_path = Some(dir.join(&name));

        let (writer, guard) = non_blocking(rolling::never(&dir, name));
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard registry poisoned"))?
            .push(guard);

        if config.json_format {
            layers.push(
                fmt::Layer::new()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .boxed(),
            );
        } else {
            layers.push(
                fmt::Layer::new()
                    .with_writer(writer)
                    .with_target(false)
                    .with_ansi(false)
                    .boxed(),
            );
        }
    }

    if layers.is_empty() {
        return Err(anyhow!("No logging output configured"));
    }

    Registry::default()
        .with(layers)
        .with(env_filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    info!("Logging initialized at level {}", config.level);
    if let Some(path) = file_path {
        info!("Log file: {}", path.display());
    }
    Ok(())
}
