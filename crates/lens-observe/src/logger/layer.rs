use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, fmt::time::OffsetTime, layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::logger::{config::LoggerConfig, error::LoggerError, format::LoggerFormat};

type OutputLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Installs `cfg` as the process-wide subscriber. Only the first call in a process succeeds.
pub(super) fn install(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let directives = parse_directives(&cfg.level)?;
    let output = output_for(cfg)?;
    tracing_subscriber::registry()
        .with(output.with_filter(directives))
        .try_init()
        .map_err(|_| LoggerError::AlreadyInitialized)
}

/// Writer layer for the configured format, not yet filtered.
fn output_for(cfg: &LoggerConfig) -> Result<OutputLayer, LoggerError> {
    let layer = match cfg.format {
        LoggerFormat::Text => fmt::layer()
            .with_ansi(cfg.use_color)
            .with_target(cfg.with_targets)
            .with_timer(rfc3339_local())
            .boxed(),
        // Event fields sit at the top level of each line; span context is dropped.
        LoggerFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_ansi(false)
            .with_target(cfg.with_targets)
            .with_timer(rfc3339_local())
            .boxed(),
        LoggerFormat::Journald => journal_output()?,
    };
    Ok(layer)
}

fn parse_directives(level: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_new(level).map_err(|_| LoggerError::InvalidLogLevel(level.to_string()))
}

fn rfc3339_local() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

#[cfg(all(target_os = "linux", feature = "journald"))]
fn journal_output() -> Result<OutputLayer, LoggerError> {
    let layer = tracing_journald::layer()
        .map_err(|e| LoggerError::InitializationFailed(format!("journald socket: {e}")))?
        .with_syslog_identifier("lens-agentd".to_string());
    Ok(layer.boxed())
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
fn journal_output() -> Result<OutputLayer, LoggerError> {
    Err(LoggerError::JournaldNotSupported)
}
