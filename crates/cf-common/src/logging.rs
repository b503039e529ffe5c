//! ---
//! cf_section: "03-persistence-logging"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Tracing subscriber setup shared by the failover binaries."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Filter override checked before `RUST_LOG`.
pub const LOG_ENV: &str = "CF_LOG";
const FALLBACK_FILTER: &str = "info";

/// Writer guards live for the whole process so buffered lines are flushed on exit.
static GUARDS: OnceCell<[WorkerGuard; 2]> = OnceCell::new();

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Stdout format of the daemon. The rolling file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Install the global subscriber: stdout in `config.format` plus a daily
/// rolling JSON file under `config.directory`.
///
/// The filter comes from `CF_LOG`, then `RUST_LOG`, then `info`. Calling this
/// again keeps the first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)
        .with_context(|| format!("unable to create log directory {}", config.directory.display()))?;
    let file_name = format!(
        "{}.log",
        config.file_prefix.as_deref().unwrap_or(service_name)
    );

    let (file_writer, file_guard) = file_writer(&config.directory, &file_name);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = GUARDS.set([file_guard, stdout_guard]);

    let installed = tracing_subscriber::registry()
        .with(resolve_filter())
        .with(stdout_layer(config.format, stdout_writer))
        .with(file_layer(file_writer))
        .try_init()
        .is_ok();

    if installed {
        info!(
            service = %service_name,
            log_dir = %config.directory.display(),
            file = %file_name,
            format = ?config.format,
            "tracing initialised"
        );
    }
    Ok(())
}

fn file_writer(directory: &Path, file_name: &str) -> (NonBlocking, WorkerGuard) {
    tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, file_name))
}

fn resolve_filter() -> EnvFilter {
    let Ok(directive) = std::env::var(LOG_ENV) else {
        return EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER));
    };
    EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("ignoring {LOG_ENV}={directive:?} ({err}); logging at {FALLBACK_FILTER}");
        EnvFilter::new(FALLBACK_FILTER)
    })
}

fn stdout_layer<S>(format: LogFormat, writer: NonBlocking) -> BoxedLayer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let layer = fmt::layer().with_timer(UtcTime::rfc_3339()).with_writer(writer);
    match format {
        LogFormat::StructuredJson => layer.with_target(false).json().boxed(),
        LogFormat::Pretty => layer.with_target(true).boxed(),
    }
}

fn file_layer<S>(writer: NonBlocking) -> BoxedLayer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(writer)
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        format: LogFormat,
    }

    #[test]
    fn formats_are_spelled_in_kebab_case() {
        let json: Wrapper = toml::from_str(r#"format = "structured-json""#).unwrap();
        assert_eq!(json.format, LogFormat::StructuredJson);
        let pretty: Wrapper = toml::from_str(r#"format = "pretty""#).unwrap();
        assert_eq!(pretty.format, LogFormat::Pretty);
        assert!(toml::from_str::<Wrapper>(r#"format = "Pretty""#).is_err());
    }

    #[test]
    fn init_creates_log_directory_and_tolerates_reinit() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            directory: dir.path().join("nested").join("logs"),
            file_prefix: Some("cf-test".to_owned()),
            ..LoggingConfig::default()
        };
        init_tracing("cf-test", &config).unwrap();
        init_tracing("cf-test", &config).unwrap();
        assert!(config.directory.is_dir());
    }
}
