use tracing::{debug, trace};
use tracing_subscriber::EnvFilter;

/// Filter directive for a `-v` count
pub fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,hyper=debug,tower=debug",
    }
}

/// Initialize tracing.
///
/// Any `-v` flag wins over the configured directive; without one the
/// configured `log_level` is used, falling back to `info`.
pub fn init_logging(verbose: u8, configured: Option<&str>) {
    let directive = match (verbose, configured) {
        (0, Some(level)) => level.to_string(),
        _ => log_level(verbose).to_string(),
    };
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .with_thread_ids(verbose >= 3)
        .with_line_number(verbose >= 3)
        .init();

    debug!("costguard started with verbosity level: {}", verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());
}
