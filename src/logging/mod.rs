//! Logging setup for the Mimic client and server
//!
//! Console output with ANSI level colors and UTC timestamps, plus an
//! optional daily-rolling file layer.

use std::path::Path;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const COLOR_TRACE: &str = "\x1b[37m";
const COLOR_DEBUG: &str = "\x1b[36m";
const COLOR_INFO: &str = "\x1b[32m";
const COLOR_WARN: &str = "\x1b[33m";
const COLOR_ERROR: &str = "\x1b[31m";
const COLOR_RESET: &str = "\x1b[0m";

/// Initialize the global subscriber
pub fn init(log_level: &str, log_to_file: bool, log_file_path: Option<&str>) -> anyhow::Result<()> {
    let level = parse_log_level(log_level)?;

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .event_format(LogFormatter { ansi: true });

    let file_layer = if log_to_file {
        let path = Path::new(log_file_path.unwrap_or("logs/mimic.log"));
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("logs"));
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mimic.log".to_string());
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, file);
        Some(
            fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .event_format(LogFormatter { ansi: false }),
        )
    } else {
        None
    };

    let registry = tracing_subscriber::registry().with(filter);
    if let Some(file_layer) = file_layer {
        registry.with(console_layer).with(file_layer).init();
    } else {
        registry.with(console_layer).init();
    }

    Ok(())
}

struct LogFormatter {
    ansi: bool,
}

impl<S, N> fmt::FormatEvent<S, N> for LogFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();

        let now: chrono::DateTime<chrono::Utc> = std::time::SystemTime::now().into();
        write!(writer, "[{}] ", now.format("%Y-%m-%d %H:%M:%S%.3f UTC"))?;

        if self.ansi {
            let color = match *metadata.level() {
                Level::TRACE => COLOR_TRACE,
                Level::DEBUG => COLOR_DEBUG,
                Level::INFO => COLOR_INFO,
                Level::WARN => COLOR_WARN,
                Level::ERROR => COLOR_ERROR,
            };
            write!(writer, "{}{:<5}{} ", color, metadata.level(), COLOR_RESET)?;
        } else {
            write!(writer, "{:<5} ", metadata.level())?;
        }

        write!(writer, "{}: ", metadata.target())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" => Ok(Level::WARN),
        "ERROR" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("invalid log level: {level}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("ERROR").unwrap(), Level::ERROR);
        assert!(parse_log_level("verbose").is_err());
    }
}
