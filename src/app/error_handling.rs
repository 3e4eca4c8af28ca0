use tracing::error;

/// Report a fatal error and exit.
///
/// The cause chain is printed with `-v` and above. Configuration errors exit
/// with 2, everything else with 1.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {}", error);
    eprintln!("Error: {error}");

    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    let exit_code = if error.chain().any(|cause| cause.is::<toml::de::Error>()) {
        2
    } else {
        1
    };
    std::process::exit(exit_code)
}
