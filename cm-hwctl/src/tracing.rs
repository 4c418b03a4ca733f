//! Tracing setup for programs built on this crate.
//!
//! Library code logs through `use crate::tracing::prelude::*`. Programs call
//! [`init_stdout`] once at startup to install a subscriber. Bus traffic is
//! logged at TRACE with structured fields, so `RUST_LOG=cm_hwctl=trace`
//! shows every transaction and `RUST_LOG=cm_hwctl::peripheral::si53xx=trace`
//! narrows it to one chip family.

use std::fmt;
use std::io::IsTerminal;

use time::OffsetDateTime;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{
        FmtContext, FormatEvent, FormatFields,
        format::{DefaultFields, Writer as FmtWriter},
        time::FormatTime,
    },
    prelude::*,
    registry::LookupSpan,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

const CRATE_PREFIX: &str = "cm_hwctl::";

/// Log to stdout, filtering according to RUST_LOG, INFO if unset.
pub fn init_stdout() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    let formatter = CompactFormatter {
        color: std::io::stdout().is_terminal(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(LocalTimer)
                .fmt_fields(DefaultFields::new())
                .event_format(formatter),
        )
        .init();
}

/// One line per event: time, level, short target, message, then fields.
struct CompactFormatter {
    color: bool,
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: Vec<(&'static str, String)>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields.push((field.name(), format!("{:?}", value)));
        }
    }
}

/// Strip this crate's prefix from a target; keep dependency paths whole.
fn short_target(target: &str) -> &str {
    target.strip_prefix(CRATE_PREFIX).unwrap_or(target)
}

fn level_style(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::ERROR => ("\x1b[31m", "ERROR"),
        Level::WARN => ("\x1b[33m", "WARN "),
        Level::INFO => ("\x1b[32m", "INFO "),
        Level::DEBUG => ("\x1b[34m", "DEBUG"),
        Level::TRACE => ("\x1b[35m", "TRACE"),
    }
}

impl<S, N> FormatEvent<S, N> for CompactFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: FmtWriter<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        LocalTimer.format_time(&mut writer)?;
        let (color, level) = level_style(*event.metadata().level());
        if self.color {
            write!(writer, " {}{}\x1b[0m ", color, level)?;
        } else {
            write!(writer, " {} ", level)?;
        }
        write!(writer, "{}: ", short_target(event.metadata().target()))?;

        if let Some(msg) = &visitor.message {
            write!(writer, "{}", msg)?;
        }

        if !visitor.fields.is_empty() {
            if self.color {
                write!(writer, "\x1b[90m")?;
            }
            for (key, value) in &visitor.fields {
                write!(writer, " {}={}", key, value.trim_matches('"'))?;
            }
            if self.color {
                write!(writer, "\x1b[0m")?;
            }
        }

        writeln!(writer)
    }
}

/// Local wall-clock time to the millisecond; bus traces come in bursts.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut FmtWriter<'_>) -> fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let stamp = now
            .format(time::macros::format_description!(
                "[hour]:[minute]:[second].[subsecond digits:3]"
            ))
            .map_err(|_| fmt::Error)?;
        write!(w, "{}", stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_targets_are_shortened() {
        assert_eq!(short_target("cm_hwctl::device"), "device");
        assert_eq!(short_target("cm_hwctl::peripheral::si53xx"), "peripheral::si53xx");
        assert_eq!(short_target("tokio::runtime"), "tokio::runtime");
    }

    #[test]
    fn every_level_label_is_five_wide() {
        for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
            assert_eq!(level_style(level).1.len(), 5);
        }
    }
}
