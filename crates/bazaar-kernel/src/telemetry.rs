//! Tracing setup for binaries embedding the agent system.

/// Initialize a stderr subscriber honoring `RUST_LOG`, defaulting to `info`.
///
/// Call once at process start; a second call is a no-op rather than a panic.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
