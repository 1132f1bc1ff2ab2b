//! Process-wide tracing subscriber.
//!
//! `LOG_LEVEL` picks the default level and must be one of `debug`, `info`,
//! `warn` or `error` (any case). `RUST_LOG` directives are layered on top.

use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid {LOG_LEVEL_ENV} {0:?}: expected one of debug, info, warn, error")]
pub struct InvalidLogLevel(pub String);

/// Map a `LOG_LEVEL` value to a filter. Unset or blank means `info`.
pub fn parse_log_level(value: Option<&str>) -> Result<LevelFilter, InvalidLogLevel> {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(LevelFilter::INFO);
    };
    match raw.to_ascii_lowercase().as_str() {
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" => Ok(LevelFilter::WARN),
        "error" => Ok(LevelFilter::ERROR),
        _ => Err(InvalidLogLevel(raw.to_string())),
    }
}

/// Install the stderr subscriber. Fails on an unrecognised `LOG_LEVEL`.
pub fn init() -> Result<()> {
    let level = parse_log_level(std::env::var(LOG_LEVEL_ENV).ok().as_deref())?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_and_blank_default_to_info() {
        assert_eq!(parse_log_level(None), Ok(LevelFilter::INFO));
        assert_eq!(parse_log_level(Some("  ")), Ok(LevelFilter::INFO));
    }

    #[test]
    fn levels_are_case_insensitive() {
        assert_eq!(parse_log_level(Some("DEBUG")), Ok(LevelFilter::DEBUG));
        assert_eq!(parse_log_level(Some("Warn")), Ok(LevelFilter::WARN));
        assert_eq!(parse_log_level(Some("error")), Ok(LevelFilter::ERROR));
    }

    #[test]
    fn unknown_level_is_rejected() {
        for bad in ["trace", "verbose", "0"] {
            let err = parse_log_level(Some(bad)).unwrap_err();
            assert_eq!(err, InvalidLogLevel(bad.to_string()));
            assert!(err.to_string().contains("LOG_LEVEL"));
        }
    }
}
