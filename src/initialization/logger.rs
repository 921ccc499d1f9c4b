//! Logger initialization.
//!
//! Plain output is meant for a terminal watching a run; JSON output is one
//! object per line for log shippers following long runs.

use std::io::Write;

use colored::*;
use env_logger::fmt::Formatter;
use log::{Level, LevelFilter, Record};

use crate::config::LogFormat;
use crate::error_handling::InitializationError;

/// Dependencies whose chatter drowns out proxy and provider transitions.
const QUIET_MODULES: &[(&str, LevelFilter)] = &[
    ("sqlx", LevelFilter::Warn),
    ("reqwest", LevelFilter::Info),
    ("hyper", LevelFilter::Info),
    ("hyper_util", LevelFilter::Info),
    // Truncated UDP answers are retried by the resolver itself
    ("hickory_proto", LevelFilter::Error),
];

fn level_marker(level: Level) -> (ColoredString, &'static str) {
    let name = level.to_string();
    match level {
        Level::Error => (name.red(), "❌"),
        Level::Warn => (name.yellow(), "⚠️"),
        Level::Info => (name.green(), "✔️"),
        Level::Debug => (name.blue(), "🔍"),
        Level::Trace => (name.purple(), "🔬"),
    }
}

fn write_plain(buf: &mut Formatter, record: &Record) -> std::io::Result<()> {
    let (level, emoji) = level_marker(record.level());
    writeln!(buf, "{emoji} {} [{level}] {}", record.target().cyan(), record.args())
}

/// Renders one log line as a JSON object.
fn json_line(timestamp_ms: i64, record: &Record) -> String {
    serde_json::json!({
        "ts": timestamp_ms,
        "level": record.level().as_str(),
        "target": record.target(),
        "msg": record.args().to_string(),
    })
    .to_string()
}

/// Initializes the global logger.
///
/// `RUST_LOG` is read first so per-module directives still apply, then
/// `level` overrides the global and crate levels. Calling this twice returns
/// `InitializationError::LoggerError` rather than panicking.
///
/// ```bash
/// RUST_LOG=scan_fleet::proxy=trace scan_fleet --scope NL:municipality --log-level info
/// ```
pub fn init_logger_with(level: LevelFilter, format: LogFormat) -> Result<(), InitializationError> {
    colored::control::set_override(true);

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);
    for (module, quiet) in QUIET_MODULES {
        builder.filter_module(module, *quiet);
    }
    builder.filter_module("scan_fleet", level);

    match format {
        LogFormat::Json => builder.format(|buf, record| {
            writeln!(buf, "{}", json_line(chrono::Utc::now().timestamp_millis(), record))
        }),
        LogFormat::Plain => builder.format(write_plain),
    };

    builder.try_init().map_err(InitializationError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_line_escapes_message() {
        let line = json_line(
            42,
            &Record::builder()
                .args(format_args!("proxy \"10.0.0.1:3128\" marked dead"))
                .level(Level::Warn)
                .target("scan_fleet::proxy")
                .build(),
        );

        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["ts"], 42);
        assert_eq!(parsed["level"], "WARN");
        assert_eq!(parsed["target"], "scan_fleet::proxy");
        assert_eq!(parsed["msg"], "proxy \"10.0.0.1:3128\" marked dead");
    }

    #[test]
    fn test_second_initialization_is_an_error() {
        let first = init_logger_with(LevelFilter::Info, LogFormat::Plain);
        let second = init_logger_with(LevelFilter::Debug, LogFormat::Json);
        assert!(first.is_ok() || matches!(first, Err(InitializationError::LoggerError(_))));
        assert!(matches!(second, Err(InitializationError::LoggerError(_))));
    }
}
