// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracing formatter and subscriber setup.
//!
//! Every line is prefixed with `DD_LOG_STORE` so store output can be told
//! apart from the host application's logs:
//!
//! ```text
//! DD_LOG_STORE | LEVEL | [span{fields}: ]message fields
//! ```

use std::fmt;

use tracing::subscriber::SetGlobalDefaultError;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::log_level::LogLevel;

/// Crates that are too chatty below `WARN` for store logs.
const QUIET_TARGETS: &str = "h2=off,hyper=off,rustls=off";

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(&mut writer, "DD_LOG_STORE | {} | ", event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Filter directive for `level`, with noisy dependencies switched off.
#[must_use]
pub fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::new(format!("{QUIET_TARGETS},{}", level.as_ref().to_lowercase()))
}

/// Installs the global subscriber writing formatted lines to stderr.
///
/// # Errors
///
/// Fails if a global subscriber was already set.
pub fn init(level: LogLevel) -> Result<(), SetGlobalDefaultError> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .without_time()
        .event_format(Formatter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    tracing::debug!("Logging subsystem enabled");
    Ok(())
}
