//! Logging setup for applications embedding the client, and span helpers
//! used by the purchase flow.

use std::{ffi::OsStr, fmt::Display, path::Path};
use tracing::{warn, Level, Span};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::Targets, prelude::*};

use crate::{config::LoggingConfig, DataEscrowClientError, Result};

/// Writer guards of the file layers. Hold on to this for as long as the
/// program runs; dropping it flushes and stops the file writers.
#[derive(Default)]
pub struct LoggingGuards {
    _all_layer_guard: Option<WorkerGuard>,
    _escrow_layer_guard: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// Events from the escrow crates at `stdout_log_level` or above go to
/// standard out. If log files are configured, every event from the escrow
/// crates is also written as JSON to `escrow_logs_file_name`, and every event
/// from any crate to `all_logs_file_name`. Both files roll hourly.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuards> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(our_targets_filter(config.stdout_log_level));

    let logging_guards = match &config.log_files {
        Some(file_config) => {
            let (all_logs_dir, all_logs_file) = get_paths(&file_config.all_logs_file_name)?;
            let (escrow_logs_dir, escrow_logs_file) =
                get_paths(&file_config.escrow_logs_file_name)?;

            let all_appender = tracing_appender::rolling::hourly(all_logs_dir, all_logs_file);
            let (non_blocking, all_layer_guard) = tracing_appender::non_blocking(all_appender);
            let all_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking);

            let escrow_appender =
                tracing_appender::rolling::hourly(escrow_logs_dir, escrow_logs_file);
            let (non_blocking, escrow_layer_guard) =
                tracing_appender::non_blocking(escrow_appender);
            let escrow_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(our_targets_filter(Level::TRACE));

            tracing_subscriber::registry()
                .with(stdout_layer)
                .with(escrow_layer)
                .with(all_layer)
                .init();

            LoggingGuards {
                _all_layer_guard: Some(all_layer_guard),
                _escrow_layer_guard: Some(escrow_layer_guard),
            }
        }
        None => {
            tracing_subscriber::registry().with(stdout_layer).init();
            LoggingGuards::default()
        }
    };

    Ok(logging_guards)
}

/// Split a log file path into its directory and file name.
fn get_paths(path: &Path) -> Result<(&Path, &OsStr)> {
    let dir = path
        .parent()
        .ok_or_else(|| DataEscrowClientError::InvalidLogFilePath(path.into()))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| DataEscrowClientError::InvalidLogFilePath(path.into()))?;
    Ok((dir, file_name))
}

fn our_targets_filter(level: Level) -> Targets {
    Targets::new()
        .with_target("data_escrow", level)
        .with_target("data_escrow_client", level)
}

/// Record `field_value` on the current span. The field must have been
/// declared when the span was created, e.g. with
/// `#[instrument(fields(agreement_id))]`; debug builds warn when it was not.
pub(crate) fn record_field(field_name: &str, field_value: &dyn Display) {
    if cfg!(debug_assertions) && !Span::current().has_field(field_name) {
        warn!("Field {} not defined in current span!", field_name);
    }

    let _ = Span::current().record(field_name, &field_value.to_string().as_str());
}
