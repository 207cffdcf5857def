// Logging setup for the binary.
//
// The library only emits `tracing` events; installing a subscriber is the
// binary's job. Diagnostics go to stderr so they never mix with the menu.

/// Install the fmt subscriber. Level defaults to `info` and can be tuned
/// with `RUST_LOG`, e.g. `RUST_LOG=mft_cli=debug` to see request snapshots
/// and full error bodies.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // Leaves an already installed subscriber in place.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
