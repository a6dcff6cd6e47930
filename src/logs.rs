//
// logs.rs
// Dicom-Trolley-Tool-rs
//
// Installs the tracing subscriber. Log lines go to stderr so command output on stdout stays pipeable.
//
// Thales Matheus Mendonça Santos - October 2026

use tracing::Level;

/// Log level for a `-v` count: INFO, then DEBUG, then TRACE.
pub fn level_for_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the global subscriber. Calling this twice keeps the first subscriber.
pub fn configure_logging(verbose: u8) {
    let installed = tracing_subscriber::fmt()
        .with_max_level(level_for_verbosity(verbose))
        .with_target(verbose > 0)
        .with_writer(std::io::stderr)
        .try_init();
    if installed.is_err() {
        tracing::debug!("Logging was already configured");
    }
}
