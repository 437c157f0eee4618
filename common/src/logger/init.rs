use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Default directives: our crates stay chatty, the HTTP and DB stacks
/// only speak up when something is wrong.
const DEFAULT_FILTER: &str = "info,sqlx=warn,reqwest=warn,hyper=warn";

/// Installs the global subscriber.
///
/// Production runs emit flattened JSON lines for the log pipeline; dev
/// runs get the compact human format with file locations.
pub fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true).with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    }
}
