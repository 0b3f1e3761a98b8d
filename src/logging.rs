//! Tracing subscriber setup for the `pstore` binary.
//!
//! Logs always go to stderr so command output on stdout stays parseable.

use std::io::{self, IsTerminal};

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default filter directive for the given verbosity.
///
/// `quiet` wins over `verbose`. Verbosity 0 is info, 1 is debug, 2+ is trace.
#[must_use]
pub fn default_directive(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "pstore=error";
    }
    match verbose {
        0 => "pstore=info",
        1 => "pstore=debug",
        _ => "pstore=trace",
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the verbosity flags. With `json` set, each event is
/// one JSON line; otherwise output is colored on a terminal and compact
/// plain text when piped.
pub fn init_logging(json: bool, verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, quiet)));

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::NONE)
                    .with_writer(io::stderr),
            )
            .init();
    } else if io::stderr().is_terminal() {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_span_events(FmtSpan::NONE)
                    .with_writer(io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .compact()
                    .with_writer(io::stderr),
            )
            .init();
    }
}
